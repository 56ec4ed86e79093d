// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod mock;
mod provider;
mod types;

pub use mock::MockProvider;
pub use provider::{derive_history_budget, Provider, SAFETY_BUFFER_TOKENS};
pub use types::{
    approx_text_tokens, ChatMessage, FinishReason, FunctionCall, LlmResponse, ModelConfig,
    ProviderToolCall, Role, ToolCallSpec, ToolSchema, Usage,
};
