// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;

use crate::provider::Provider;
use crate::types::{
    ChatMessage, FinishReason, LlmResponse, ModelConfig, ProviderToolCall, ToolSchema, Usage,
};

/// A pre-scripted mock provider.  Each `generate` call pops the next response
/// from the front of the queue, so tests can script exact sequences of
/// text and tool-call responses without network access.
///
/// Every request is recorded in `requests` for inspection.
pub struct MockProvider {
    responses: Mutex<VecDeque<LlmResponse>>,
    /// Every message list this provider was asked to complete.
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    config: ModelConfig,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            config: ModelConfig {
                name: "mock-model".into(),
                ..ModelConfig::default()
            },
        }
    }

    /// Override the advertised model limits (for budget-derivation tests).
    pub fn with_model_config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    /// Queue a plain text response.
    pub fn push_text(&self, content: impl Into<String>) {
        self.push_response(LlmResponse {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        });
    }

    /// Queue a response containing a single tool call.
    pub fn push_tool_call(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) {
        self.push_response(LlmResponse {
            content: None,
            tool_calls: vec![ProviderToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            }],
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        });
    }

    /// Queue an arbitrary scripted response.
    pub fn push_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Convenience: provider that always has one text reply queued.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let p = Self::new();
        p.push_text(reply);
        p
    }

    /// Convenience: a tool call followed by a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        let p = Self::new();
        p.push_tool_call(tool_id, tool_name, args_json);
        p.push_text(final_text);
        p
    }

    /// Number of `generate` calls observed so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The most recent message list sent to this provider.
    pub fn last_request(&self) -> Option<Vec<ChatMessage>> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_config(&self) -> &ModelConfig {
        &self.config
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSchema],
    ) -> anyhow::Result<LlmResponse> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match self.responses.lock().unwrap().pop_front() {
            Some(r) => Ok(r),
            None => bail!("mock provider has no scripted response left"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
