// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::types::{
    approx_text_tokens, ChatMessage, LlmResponse, ModelConfig, ToolSchema,
};

/// Tokens held back from the history budget to absorb estimation error.
pub const SAFETY_BUFFER_TOKENS: usize = 1_024;

/// Contract every LLM backend must satisfy.
///
/// Concrete HTTP adapters live outside this workspace; the core only needs
/// `generate` plus token accounting. The default token counters use the
/// ceil(chars/4) approximation; adapters that can count precisely should
/// override them.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Static limits of the backing model.
    fn model_config(&self) -> &ModelConfig;

    /// Run one completion over the full message list.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> anyhow::Result<LlmResponse>;

    /// Estimate the prompt tokens for a message list.
    fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        messages
            .iter()
            .map(|m| {
                let calls: usize = m
                    .tool_calls
                    .iter()
                    .map(|tc| tc.function.name.len() + tc.function.arguments.len())
                    .sum();
                approx_text_tokens(&m.content) + calls.div_ceil(4)
            })
            .sum()
    }

    /// Estimate the overhead of advertising the given tool schemas.
    fn count_tools_tokens(&self, tools: &[ToolSchema]) -> usize {
        tools
            .iter()
            .map(|t| {
                approx_text_tokens(&t.name)
                    + approx_text_tokens(&t.description)
                    + approx_text_tokens(&t.parameters.to_string())
            })
            .sum()
    }
}

/// Derive the absolute token budget for conversation history:
/// `context_window − max_output − system prompt − tool schemas − safety buffer`.
///
/// Saturates at zero rather than underflowing for tiny context windows.
pub fn derive_history_budget(
    model: &ModelConfig,
    system_prompt_tokens: usize,
    tools_tokens: usize,
) -> usize {
    model
        .context_window
        .saturating_sub(model.max_output_tokens)
        .saturating_sub(system_prompt_tokens)
        .saturating_sub(tools_tokens)
        .saturating_sub(SAFETY_BUFFER_TOKENS)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
