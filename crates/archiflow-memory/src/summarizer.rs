// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;

use archiflow_messages::AgentMessage;
use archiflow_model::{ChatMessage, Provider};

const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation history \
     in a concise, information-dense way. Preserve all technical details, decisions, file \
     names, code snippets, and tool outputs that may be relevant to future work. \
     The summary will replace the original history to free up context space.";

/// Turns a dropped chunk of history into the text of a summary message.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;
    async fn summarize(&self, messages: &[AgentMessage]) -> anyhow::Result<String>;
}

/// Deterministic, zero-cost summary: counts by message kind plus the set of
/// tools that were invoked.  Never fails, which makes it the fallback for
/// every other summarizer.
pub struct SimpleSummarizer;

impl SimpleSummarizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SimpleSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for SimpleSummarizer {
    fn name(&self) -> &str {
        "simple"
    }

    async fn summarize(&self, messages: &[AgentMessage]) -> anyhow::Result<String> {
        let mut users = 0usize;
        let mut assistant = 0usize;
        let mut tool_results = 0usize;
        let mut other = 0usize;
        let mut tools: BTreeSet<String> = BTreeSet::new();

        for msg in messages {
            match msg {
                AgentMessage::User { .. } => users += 1,
                AgentMessage::Respond { .. } | AgentMessage::Think { .. } => assistant += 1,
                AgentMessage::ToolCalls { tool_calls, .. } => {
                    assistant += 1;
                    tools.extend(tool_calls.iter().map(|tc| tc.name.clone()));
                }
                AgentMessage::ToolResult(_) => tool_results += 1,
                AgentMessage::BatchToolResult { results, .. } => tool_results += results.len(),
                _ => other += 1,
            }
        }

        let mut summary = format!(
            "Earlier conversation ({} messages): {users} user, {assistant} assistant, \
             {tool_results} tool results",
            messages.len()
        );
        if other > 0 {
            summary.push_str(&format!(", {other} other"));
        }
        if !tools.is_empty() {
            let names: Vec<String> = tools.into_iter().collect();
            summary.push_str(&format!("; tools invoked: {}", names.join(", ")));
        }
        summary.push('.');
        Ok(summary)
    }
}

/// Asks the provider for a bounded-length summary of the chunk.
pub struct LlmSummarizer {
    provider: Arc<dyn Provider>,
    max_summary_tokens: usize,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn Provider>, max_summary_tokens: usize) -> Self {
        Self {
            provider,
            max_summary_tokens,
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    fn name(&self) -> &str {
        "llm"
    }

    async fn summarize(&self, messages: &[AgentMessage]) -> anyhow::Result<String> {
        let history = serialize_history(messages);
        let prompt = format!(
            "{SUMMARIZE_PROMPT}\n\nKeep the summary under roughly {} tokens.\n\n---\n\n{history}",
            self.max_summary_tokens
        );
        let response = self
            .provider
            .generate(&[ChatMessage::user(prompt)], &[])
            .await
            .context("summarization call failed")?;
        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => bail!("summarization returned no content"),
        }
    }
}

/// Uses the simple summarizer for small chunks and the LLM for large ones.
pub struct HybridSummarizer {
    simple: SimpleSummarizer,
    llm: LlmSummarizer,
    /// Chunks with fewer messages than this stay on the simple path.
    llm_threshold: usize,
}

impl HybridSummarizer {
    pub fn new(provider: Arc<dyn Provider>, llm_threshold: usize, max_summary_tokens: usize) -> Self {
        Self {
            simple: SimpleSummarizer::new(),
            llm: LlmSummarizer::new(provider, max_summary_tokens),
            llm_threshold,
        }
    }
}

#[async_trait]
impl Summarizer for HybridSummarizer {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn summarize(&self, messages: &[AgentMessage]) -> anyhow::Result<String> {
        if messages.len() < self.llm_threshold {
            self.simple.summarize(messages).await
        } else {
            self.llm.summarize(messages).await
        }
    }
}

/// Serialise a chunk into plain text for inclusion in a summarization prompt.
pub(crate) fn serialize_history(messages: &[AgentMessage]) -> String {
    messages
        .iter()
        .filter_map(|msg| {
            let line = match msg {
                AgentMessage::User { content, .. } => format!("User: {content}"),
                AgentMessage::System { content, .. } => format!("System: {content}"),
                AgentMessage::Respond { content, .. } | AgentMessage::Think { content, .. } => {
                    format!("Assistant: {content}")
                }
                AgentMessage::ToolCalls { tool_calls, .. } => {
                    let calls: Vec<String> = tool_calls
                        .iter()
                        .map(|tc| format!("{}({})", tc.name, tc.arguments))
                        .collect();
                    format!("Assistant: [tool_call: {}]", calls.join(", "))
                }
                AgentMessage::ToolResult(obs) => {
                    format!("Tool: [{}] {}", obs.call_id, obs.content)
                }
                AgentMessage::BatchToolResult { results, .. } => {
                    let lines: Vec<String> = results
                        .iter()
                        .map(|r| format!("[{}] {}", r.call_id, r.content))
                        .collect();
                    format!("Tool: {}", lines.join("; "))
                }
                AgentMessage::Environment {
                    event_type,
                    content,
                } => format!("Environment ({event_type}): {content}"),
                AgentMessage::Error { content } => format!("Error: {content}"),
                _ => return None,
            };
            Some(line)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
