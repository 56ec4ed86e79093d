// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use archiflow_messages::AgentMessage;
use archiflow_model::{ChatMessage, ToolCallSpec};

/// Project a history into the provider-neutral chat shape.
///
/// Mapping rules:
/// - system prompts and compaction summaries → `system`
/// - user turns, project context, environment events, and error
///   observations → `user` (the latter three with a bracketed marker)
/// - thoughts and responses → `assistant`
/// - tool call messages → `assistant` with a `tool_calls` array; the
///   content is the accompanying thought or `""`, never null
/// - tool results → `tool` with the matching `tool_call_id`; batch
///   observations expand to one `tool` entry per result in batch order
///
/// Control payloads (stop/finished, runtime requests, client events) have
/// no chat representation and are skipped.
pub fn to_llm_format(messages: &[AgentMessage]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg {
            AgentMessage::System { content, .. } => out.push(ChatMessage::system(content.clone())),
            AgentMessage::User { content, .. } => out.push(ChatMessage::user(content.clone())),
            AgentMessage::ProjectContext { context, .. } => {
                out.push(ChatMessage::user(format!("[Project Context] {context}")));
            }
            AgentMessage::Environment {
                event_type,
                content,
            } => {
                out.push(ChatMessage::user(format!(
                    "[Environment Event: {event_type}] {content}"
                )));
            }
            AgentMessage::Error { content } => {
                out.push(ChatMessage::user(format!("[Error] {content}")));
            }
            AgentMessage::Think { content, .. } => {
                out.push(ChatMessage::assistant(content.clone()));
            }
            AgentMessage::Respond { content, .. } => {
                out.push(ChatMessage::assistant(content.clone()));
            }
            AgentMessage::ToolCalls {
                thought,
                tool_calls,
                ..
            } => {
                let specs: Vec<ToolCallSpec> = tool_calls
                    .iter()
                    .map(|tc| {
                        ToolCallSpec::function(&tc.id, &tc.name, tc.arguments.to_string())
                    })
                    .collect();
                out.push(ChatMessage::assistant_tool_calls(
                    thought.clone().unwrap_or_default(),
                    specs,
                ));
            }
            AgentMessage::ToolResult(obs) => {
                out.push(ChatMessage::tool_result(&obs.call_id, &obs.content));
            }
            AgentMessage::BatchToolResult { results, .. } => {
                for obs in results {
                    out.push(ChatMessage::tool_result(&obs.call_id, &obs.content));
                }
            }
            // Control traffic never reaches the provider.
            AgentMessage::Stop { .. }
            | AgentMessage::Finished { .. }
            | AgentMessage::ToolCallRequest(_)
            | AgentMessage::BatchToolCallRequest { .. }
            | AgentMessage::ToolResultEvent { .. }
            | AgentMessage::PromptRefined { .. }
            | AgentMessage::ErrorEvent { .. } => {}
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
