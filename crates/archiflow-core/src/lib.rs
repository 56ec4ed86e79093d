// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod controller;
mod preprocessor;

pub use agent::{Agent, LlmAgent, FINISH_TOOL};
pub use controller::AgentController;
pub use preprocessor::{extract_json_object, PromptPreprocessor, RefinementOptions};
