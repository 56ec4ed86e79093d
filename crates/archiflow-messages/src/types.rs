// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation requested by the model.
///
/// `arguments` is the parsed JSON object; providers hand the arguments over
/// as a string and the agent parses them exactly once at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier assigned by the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome classification of a single tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

impl ToolStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ToolStatus::Success)
    }
}

/// The result of one tool call, keyed back to its call by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultObservation {
    pub call_id: String,
    pub content: String,
    pub status: ToolStatus,
}

impl ToolResultObservation {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            status: ToolStatus::Success,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            status: ToolStatus::Error,
        }
    }
}

/// Execution context attached to a tool call request on the wire.
///
/// `security_policy` names a policy profile registered with the runtime
/// manager; it is a pure data key, never a pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallContext {
    pub session_id: String,
    pub working_directory: String,
    pub security_policy: String,
}

/// A single tool call request as published on `runtime.<sid>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub session_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub context: CallContext,
}

/// Batch bookkeeping attached to client-facing mirrors of batched results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: String,
    /// Wall-clock seconds for the whole batch.
    pub batch_total_time: f64,
    /// 1-based position of this result within the batch input order.
    pub sequence_in_batch: usize,
    pub batch_size: usize,
}

/// Every payload carried on a session's topics.
///
/// The wire format is externally tagged by `type`, matching the message
/// names used throughout the framework (`"UserMessage"`,
/// `"ToolResultObservation"`, ...), so logs and topic dumps stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    /// External user turn.
    #[serde(rename = "UserMessage")]
    User {
        session_id: String,
        sequence: u64,
        content: String,
    },
    /// System prompt or compaction summary.
    #[serde(rename = "SystemMessage")]
    System {
        session_id: String,
        sequence: u64,
        content: String,
    },
    /// Injected project guidelines with their file provenance.
    #[serde(rename = "ProjectContextMessage")]
    ProjectContext {
        session_id: String,
        context: String,
        sources: Vec<String>,
    },
    /// Notification about an external event.
    #[serde(rename = "EnvironmentMessage")]
    Environment { event_type: String, content: String },
    /// The agent's final text for a turn.
    #[serde(rename = "LLMRespondMessage")]
    Respond {
        session_id: String,
        sequence: u64,
        content: String,
    },
    /// Intermediate reasoning surfaced to the client.
    #[serde(rename = "LLMThinkMessage")]
    Think { session_id: String, content: String },
    /// One or more tool invocations requested by the agent.
    #[serde(rename = "ToolCallMessage")]
    ToolCalls {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    /// Single tool result fed back to the agent.
    #[serde(rename = "ToolResultObservation")]
    ToolResult(ToolResultObservation),
    /// Aggregated results of a batch, in batch input order.
    #[serde(rename = "BatchToolResultObservation")]
    BatchToolResult {
        batch_id: String,
        results: Vec<ToolResultObservation>,
    },
    /// Non-fatal problem feedback for the model.
    #[serde(rename = "ErrorObservation")]
    Error { content: String },
    /// Stops the agent loop; subsequent inbound events are ignored.
    #[serde(rename = "StopMessage")]
    Stop { reason: String },
    /// Terminal: the agent considers the task complete.
    #[serde(rename = "AgentFinishedMessage")]
    Finished { reason: String },

    // ── runtime.<sid> requests ───────────────────────────────────────────
    /// Execute one tool.
    #[serde(rename = "ToolCallRequest")]
    ToolCallRequest(ToolCallRequest),
    /// Execute several tools concurrently as one batch.
    #[serde(rename = "BatchToolCallRequest")]
    BatchToolCallRequest {
        session_id: String,
        batch_id: String,
        calls: Vec<ToolCallRequest>,
    },

    // ── client.<sid> events ──────────────────────────────────────────────
    /// Client-facing mirror of a tool result (suppressed for internal tools).
    #[serde(rename = "ToolResult")]
    ToolResultEvent {
        session_id: String,
        call_id: String,
        tool_name: String,
        result: String,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<BatchMetadata>,
    },
    /// The preprocessor substituted a refined prompt for the original.
    #[serde(rename = "PromptRefined")]
    PromptRefined {
        session_id: String,
        original: String,
        refined: String,
        quality_score: f64,
        task_type: String,
    },
    /// Session-fatal error surfaced to the client.
    #[serde(rename = "Error")]
    ErrorEvent { session_id: String, content: String },
}

impl AgentMessage {
    /// The wire tag for this message, as serialized in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentMessage::User { .. } => "UserMessage",
            AgentMessage::System { .. } => "SystemMessage",
            AgentMessage::ProjectContext { .. } => "ProjectContextMessage",
            AgentMessage::Environment { .. } => "EnvironmentMessage",
            AgentMessage::Respond { .. } => "LLMRespondMessage",
            AgentMessage::Think { .. } => "LLMThinkMessage",
            AgentMessage::ToolCalls { .. } => "ToolCallMessage",
            AgentMessage::ToolResult(_) => "ToolResultObservation",
            AgentMessage::BatchToolResult { .. } => "BatchToolResultObservation",
            AgentMessage::Error { .. } => "ErrorObservation",
            AgentMessage::Stop { .. } => "StopMessage",
            AgentMessage::Finished { .. } => "AgentFinishedMessage",
            AgentMessage::ToolCallRequest(_) => "ToolCallRequest",
            AgentMessage::BatchToolCallRequest { .. } => "BatchToolCallRequest",
            AgentMessage::ToolResultEvent { .. } => "ToolResult",
            AgentMessage::PromptRefined { .. } => "PromptRefined",
            AgentMessage::ErrorEvent { .. } => "Error",
        }
    }

    /// The owning session, where the payload carries one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            AgentMessage::User { session_id, .. }
            | AgentMessage::System { session_id, .. }
            | AgentMessage::ProjectContext { session_id, .. }
            | AgentMessage::Respond { session_id, .. }
            | AgentMessage::Think { session_id, .. }
            | AgentMessage::ToolCalls { session_id, .. }
            | AgentMessage::BatchToolCallRequest { session_id, .. }
            | AgentMessage::ToolResultEvent { session_id, .. }
            | AgentMessage::PromptRefined { session_id, .. }
            | AgentMessage::ErrorEvent { session_id, .. } => Some(session_id),
            AgentMessage::ToolCallRequest(req) => Some(&req.session_id),
            _ => None,
        }
    }

    /// Primary textual content, for the payload kinds that have one.
    pub fn content_text(&self) -> Option<&str> {
        match self {
            AgentMessage::User { content, .. }
            | AgentMessage::System { content, .. }
            | AgentMessage::Environment { content, .. }
            | AgentMessage::Respond { content, .. }
            | AgentMessage::Think { content, .. }
            | AgentMessage::Error { content } => Some(content),
            AgentMessage::ProjectContext { context, .. } => Some(context),
            AgentMessage::ToolResult(obs) => Some(&obs.content),
            _ => None,
        }
    }

    /// Whether this payload is an inbound event for the agent loop.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            AgentMessage::User { .. }
                | AgentMessage::System { .. }
                | AgentMessage::ProjectContext { .. }
                | AgentMessage::Environment { .. }
                | AgentMessage::ToolResult(_)
                | AgentMessage::BatchToolResult { .. }
                | AgentMessage::Error { .. }
                | AgentMessage::Stop { .. }
        )
    }

    /// Rough token estimate for budget accounting: ceil(chars / 4) over the
    /// textual content, including serialized tool arguments and results.
    pub fn approx_tokens(&self) -> usize {
        let chars = match self {
            AgentMessage::ToolCalls {
                thought,
                tool_calls,
                ..
            } => {
                let args: usize = tool_calls
                    .iter()
                    .map(|tc| tc.name.len() + tc.arguments.to_string().len())
                    .sum();
                args + thought.as_deref().map_or(0, str::len)
            }
            AgentMessage::BatchToolResult { results, .. } => {
                results.iter().map(|r| r.content.len()).sum()
            }
            other => other.content_text().map_or(0, str::len),
        };
        chars.div_ceil(4)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn user_message_wire_tag() {
        let msg = AgentMessage::User {
            session_id: "s1".into(),
            sequence: 0,
            content: "hello".into(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "UserMessage");
        assert_eq!(v["sequence"], 0);
        assert_eq!(msg.kind(), "UserMessage");
    }

    #[test]
    fn tool_status_serializes_lowercase() {
        let obs = ToolResultObservation::success("c1", "ok");
        let v = serde_json::to_value(&obs).unwrap();
        assert_eq!(v["status"], "success");
        let back: ToolResultObservation = serde_json::from_value(v).unwrap();
        assert!(back.status.is_success());
    }

    #[test]
    fn tool_result_observation_round_trips_through_enum() {
        let msg = AgentMessage::ToolResult(ToolResultObservation::error("c9", "Error: boom"));
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"type\":\"ToolResultObservation\""));
        let back: AgentMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn tool_call_message_keeps_arguments_as_json() {
        let msg = AgentMessage::ToolCalls {
            session_id: "s1".into(),
            thought: None,
            tool_calls: vec![ToolCall::new("c1", "read", json!({"file_path": "foo.txt"}))],
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["tool_calls"][0]["arguments"]["file_path"], "foo.txt");
        // Absent thought must not appear on the wire.
        assert!(v.get("thought").is_none());
    }

    #[test]
    fn batch_request_round_trip() {
        let req = ToolCallRequest {
            session_id: "s1".into(),
            call_id: "c1".into(),
            tool_name: "read".into(),
            arguments: json!({}),
            context: CallContext {
                session_id: "s1".into(),
                working_directory: "/tmp".into(),
                security_policy: "default".into(),
            },
        };
        let msg = AgentMessage::BatchToolCallRequest {
            session_id: "s1".into(),
            batch_id: "b1".into(),
            calls: vec![req],
        };
        let back: AgentMessage = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn session_id_accessor() {
        let msg = AgentMessage::Respond {
            session_id: "abc".into(),
            sequence: 3,
            content: "hi".into(),
        };
        assert_eq!(msg.session_id(), Some("abc"));
        assert_eq!(
            AgentMessage::Stop {
                reason: "done".into()
            }
            .session_id(),
            None
        );
    }

    #[test]
    fn inbound_classification() {
        assert!(AgentMessage::Stop {
            reason: "r".into()
        }
        .is_inbound());
        assert!(AgentMessage::ToolResult(ToolResultObservation::success("c", "x")).is_inbound());
        assert!(!AgentMessage::Finished {
            reason: "r".into()
        }
        .is_inbound());
        assert!(!AgentMessage::Respond {
            session_id: "s".into(),
            sequence: 0,
            content: "x".into()
        }
        .is_inbound());
    }

    #[test]
    fn approx_tokens_rounds_up() {
        let msg = AgentMessage::User {
            session_id: "s".into(),
            sequence: 0,
            content: "12345".into(), // 5 chars → 2 tokens
        };
        assert_eq!(msg.approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_counts_tool_arguments() {
        let msg = AgentMessage::ToolCalls {
            session_id: "s".into(),
            thought: None,
            tool_calls: vec![ToolCall::new("c1", "shell", json!({"command": "ls -la"}))],
        };
        assert!(msg.approx_tokens() > 0);
    }

    #[test]
    fn client_mirror_carries_batch_metadata() {
        let msg = AgentMessage::ToolResultEvent {
            session_id: "s1".into(),
            call_id: "c1".into(),
            tool_name: "read".into(),
            result: "FILE".into(),
            status: ToolStatus::Success,
            metadata: Some(BatchMetadata {
                batch_id: "b1".into(),
                batch_total_time: 0.25,
                sequence_in_batch: 1,
                batch_size: 2,
            }),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "ToolResult");
        assert_eq!(v["metadata"]["batch_size"], 2);
    }
}
