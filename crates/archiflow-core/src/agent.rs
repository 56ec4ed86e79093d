// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use archiflow_memory::{CompactionOutcome, HistoryManager};
use archiflow_messages::{AgentMessage, ToolCall};
use archiflow_model::{Provider, ToolSchema};
use archiflow_tools::ToolRegistry;

/// Reserved tool name the model calls to declare the task complete.
pub const FINISH_TOOL: &str = "finish_task";

/// A cooperative, single-session actor driven by the controller.
///
/// One step at a time per session; the controller never invokes concurrent
/// steps.  Once `is_running` is false the agent ignores inbound events and
/// emits nothing.
#[async_trait]
pub trait Agent: Send {
    fn session_id(&self) -> &str;
    fn is_running(&self) -> bool;
    /// Feed one inbound event; returns the outbound events it produced.
    async fn step(&mut self, message: AgentMessage) -> anyhow::Result<Vec<AgentMessage>>;
}

/// Reference agent: history-backed, provider-driven.
///
/// Each step adds the inbound event to history (awaiting compaction so the
/// provider call stays inside budget), asks the provider for the next move,
/// and translates the response into outbound events.  A `finish_task` tool
/// call ends the session; a plain text answer ends the turn and leaves the
/// session waiting for input.
pub struct LlmAgent {
    session_id: String,
    provider: Arc<dyn Provider>,
    history: HistoryManager,
    tool_schemas: Vec<ToolSchema>,
    system_prompt: Option<String>,
    running: bool,
    sequence: u64,
}

impl LlmAgent {
    pub fn new(
        session_id: impl Into<String>,
        provider: Arc<dyn Provider>,
        history: HistoryManager,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            provider,
            history,
            tool_schemas: vec![finish_task_schema()],
            system_prompt: None,
            running: true,
            sequence: 0,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Advertise every tool in `registry` to the provider, in addition to
    /// the built-in `finish_task`.
    pub fn with_tool_registry(mut self, registry: &ToolRegistry) -> Self {
        for schema in registry.schemas() {
            self.tool_schemas.push(ToolSchema {
                name: schema.name,
                description: schema.description,
                parameters: schema.parameters,
            });
        }
        self
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryManager {
        &mut self.history
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Keep the outbound counter strictly above everything seen inbound.
    fn observe_sequence(&mut self, message: &AgentMessage) {
        match message {
            AgentMessage::User { sequence, .. } | AgentMessage::System { sequence, .. } => {
                self.sequence = self.sequence.max(*sequence);
            }
            _ => {}
        }
    }

    fn parse_arguments(raw: &str, tool_name: &str, call_id: &str) -> Value {
        if raw.trim().is_empty() {
            return Value::Object(Default::default());
        }
        match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(error) => {
                warn!(
                    tool_name,
                    call_id,
                    %error,
                    "model sent tool call with invalid JSON arguments; substituting {{}}"
                );
                Value::Object(Default::default())
            }
        }
    }

    fn finish_reason(arguments: &str) -> String {
        serde_json::from_str::<Value>(arguments)
            .ok()
            .and_then(|v| v.get("reason").and_then(Value::as_str).map(String::from))
            .unwrap_or_else(|| "Task complete".to_string())
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn step(&mut self, message: AgentMessage) -> anyhow::Result<Vec<AgentMessage>> {
        if !self.running {
            debug!(session_id = %self.session_id, kind = message.kind(), "agent stopped, dropping event");
            return Ok(Vec::new());
        }
        if let AgentMessage::Stop { reason } = &message {
            info!(session_id = %self.session_id, reason = %reason, "agent stopped");
            self.running = false;
            return Ok(Vec::new());
        }
        if !message.is_inbound() {
            warn!(kind = message.kind(), "non-inbound event delivered to agent, ignoring");
            return Ok(Vec::new());
        }

        // First turn: the system prompt goes in front of everything else.
        if self.history.is_empty() {
            if let Some(prompt) = self.system_prompt.clone() {
                self.history.add(AgentMessage::System {
                    session_id: self.session_id.clone(),
                    sequence: 0,
                    content: prompt,
                });
            }
        }

        self.observe_sequence(&message);
        let outcome = self.history.add_async(message).await?;
        if let CompactionOutcome::StillOverBudget { tokens } = outcome {
            // Keep going; the provider may reject, and the model gets to see
            // why.
            self.history.add(AgentMessage::Error {
                content: format!(
                    "Conversation history holds {tokens} tokens and exceeds the model budget \
                     even after compaction."
                ),
            });
        }

        let view = self.history.to_llm_format();
        let response = self.provider.generate(&view, &self.tool_schemas).await?;

        let mut outbound = Vec::new();
        if response.has_tool_calls() {
            if let Some(finish) = response
                .tool_calls
                .iter()
                .find(|tc| tc.name == FINISH_TOOL)
            {
                let reason = Self::finish_reason(&finish.arguments);
                info!(session_id = %self.session_id, reason = %reason, "task finished");
                self.running = false;
                let finished = AgentMessage::Finished { reason };
                self.history.add(finished.clone());
                outbound.push(finished);
                return Ok(outbound);
            }

            let tool_calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .map(|tc| {
                    ToolCall::new(
                        &tc.id,
                        &tc.name,
                        Self::parse_arguments(&tc.arguments, &tc.name, &tc.id),
                    )
                })
                .collect();
            let thought = response.content.filter(|c| !c.trim().is_empty());
            let msg = AgentMessage::ToolCalls {
                session_id: self.session_id.clone(),
                thought,
                tool_calls,
            };
            self.history.add(msg.clone());
            outbound.push(msg);
        } else {
            let content = response.content.unwrap_or_default();
            let msg = AgentMessage::Respond {
                session_id: self.session_id.clone(),
                sequence: self.next_sequence(),
                content,
            };
            self.history.add(msg.clone());
            outbound.push(msg);
        }
        Ok(outbound)
    }
}

fn finish_task_schema() -> ToolSchema {
    ToolSchema {
        name: FINISH_TOOL.into(),
        description: "Declare the task complete. Call this exactly once, when the user's \
                      request has been fully handled."
            .into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Short completion summary shown to the user"
                }
            },
            "required": ["reason"]
        }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
