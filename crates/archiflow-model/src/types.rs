use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Chat wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The serialized form of a tool invocation inside an assistant message.
///
/// Providers expect `{id, type: "function", function: {name, arguments}}`
/// where `arguments` is a JSON-encoded *string*, not an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCallSpec {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-serialized arguments, exactly as sent to the provider.
    pub arguments: String,
}

/// One provider-neutral chat message, the shape chat completion APIs expect.
///
/// `content` is always a string; callers substitute `""` where a message has
/// no text so the wire never carries a null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn carrying tool calls; `content` holds the model's
    /// accompanying thought, or `""`.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallSpec>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Tool description advertised to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool parameters.
    pub parameters: Value,
}

// ─── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A tool call as returned by the provider: arguments still a raw JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One completed generation from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ProviderToolCall>,
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Usage,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        }
    }

    pub fn tool_calls(calls: Vec<ProviderToolCall>) -> Self {
        Self {
            content: None,
            tool_calls: calls,
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ─── Model configuration ──────────────────────────────────────────────────────

/// Static limits of a provider/model combination, used for budget derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub context_window: usize,
    pub max_output_tokens: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "unknown".into(),
            context_window: 128_000,
            max_output_tokens: 4_096,
        }
    }
}

// ─── Token estimation ─────────────────────────────────────────────────────────

/// Fallback token estimate when the provider cannot count: ceil(chars / 4).
pub fn approx_text_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tool_call_spec_wire_shape() {
        let spec = ToolCallSpec::function("c1", "read", r#"{"file_path":"foo.txt"}"#);
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "read");
        // Arguments must stay a string on the wire, not an object.
        assert!(v["function"]["arguments"].is_string());
    }

    #[test]
    fn chat_message_omits_empty_tool_fields() {
        let v = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert!(v.get("tool_calls").is_none());
        assert!(v.get("tool_call_id").is_none());
        assert_eq!(v["role"], "user");
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let v = serde_json::to_value(ChatMessage::tool_result("c7", "out")).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "c7");
    }

    #[test]
    fn finish_reason_snake_case() {
        assert_eq!(
            serde_json::to_value(FinishReason::ToolCalls).unwrap(),
            json!("tool_calls")
        );
    }

    #[test]
    fn approx_tokens_rounds_up() {
        assert_eq!(approx_text_tokens(""), 0);
        assert_eq!(approx_text_tokens("abc"), 1);
        assert_eq!(approx_text_tokens("abcde"), 2);
    }
}
