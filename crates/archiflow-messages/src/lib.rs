// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod types;

pub use types::{
    AgentMessage, BatchMetadata, CallContext, ToolCall, ToolCallRequest, ToolResultObservation,
    ToolStatus,
};
