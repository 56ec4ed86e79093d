// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use archiflow_messages::AgentMessage;

/// Three-way split produced by a compaction strategy: the manager replaces
/// `middle_chunk` with a single summary message and keeps both preserved
/// slices verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionAnalysis {
    pub preserved_head: Vec<AgentMessage>,
    pub middle_chunk: Vec<AgentMessage>,
    pub preserved_tail: Vec<AgentMessage>,
}

impl CompactionAnalysis {
    /// Nothing to fold away.
    pub fn is_noop(&self) -> bool {
        self.middle_chunk.is_empty()
    }
}

/// Selects which slice of the history to fold into a summary.
pub trait CompactionStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, messages: &[AgentMessage], retention_window: usize) -> CompactionAnalysis;
}

/// Walk the tail start backwards until every tool result inside the tail has
/// its originating tool-call message inside the tail as well.  Batch results
/// drag along the call message whose ids cover the batch.
fn extend_tail_over_tool_pairs(messages: &[AgentMessage], mut tail_start: usize) -> usize {
    loop {
        let mut changed = false;
        for idx in tail_start..messages.len() {
            let result_ids: Vec<&str> = match &messages[idx] {
                AgentMessage::ToolResult(obs) => vec![obs.call_id.as_str()],
                AgentMessage::BatchToolResult { results, .. } => {
                    results.iter().map(|r| r.call_id.as_str()).collect()
                }
                _ => continue,
            };
            for call_idx in 0..tail_start {
                if let AgentMessage::ToolCalls { tool_calls, .. } = &messages[call_idx] {
                    if tool_calls.iter().any(|tc| result_ids.contains(&tc.id.as_str())) {
                        tail_start = call_idx;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            return tail_start;
        }
    }
}

/// Anchor method (default): preserve the initial system message and the
/// first user message (the goal), keep the last `retention_window` messages
/// extended over tool-call pairs, and fold everything in between.
pub struct SelectiveRetentionStrategy;

impl SelectiveRetentionStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SelectiveRetentionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactionStrategy for SelectiveRetentionStrategy {
    fn name(&self) -> &str {
        "selective_retention"
    }

    fn analyze(&self, messages: &[AgentMessage], retention_window: usize) -> CompactionAnalysis {
        if messages.len() <= retention_window + 2 {
            return CompactionAnalysis {
                preserved_head: messages.to_vec(),
                middle_chunk: Vec::new(),
                preserved_tail: Vec::new(),
            };
        }

        let mut head_indices: Vec<usize> = Vec::new();
        if matches!(messages.first(), Some(AgentMessage::System { .. })) {
            head_indices.push(0);
        }
        if let Some(goal_idx) = messages
            .iter()
            .position(|m| matches!(m, AgentMessage::User { .. }))
        {
            if !head_indices.contains(&goal_idx) {
                head_indices.push(goal_idx);
            }
        }
        let head_end = head_indices.iter().max().map_or(0, |m| m + 1);

        let mut tail_start = messages.len().saturating_sub(retention_window);
        tail_start = extend_tail_over_tool_pairs(messages, tail_start);
        // The anchors stay in the head even when the extension reaches them.
        tail_start = tail_start.max(head_end);

        let head_set: HashSet<usize> = head_indices.iter().copied().collect();
        let preserved_head: Vec<AgentMessage> = head_indices
            .iter()
            .map(|&i| messages[i].clone())
            .collect();
        let middle_chunk: Vec<AgentMessage> = (0..tail_start)
            .filter(|i| !head_set.contains(i))
            .map(|i| messages[i].clone())
            .collect();
        let preserved_tail = messages[tail_start..].to_vec();

        CompactionAnalysis {
            preserved_head,
            middle_chunk,
            preserved_tail,
        }
    }
}

/// No anchors: keep only the last `retention_window` messages (with the
/// tool-call extension) and fold everything before them.  Suitable for
/// short open-ended chats where the goal is not fixed.
pub struct SlidingWindowStrategy;

impl SlidingWindowStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SlidingWindowStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactionStrategy for SlidingWindowStrategy {
    fn name(&self) -> &str {
        "sliding_window"
    }

    fn analyze(&self, messages: &[AgentMessage], retention_window: usize) -> CompactionAnalysis {
        if messages.len() <= retention_window {
            return CompactionAnalysis {
                preserved_head: Vec::new(),
                middle_chunk: Vec::new(),
                preserved_tail: messages.to_vec(),
            };
        }
        let mut tail_start = messages.len() - retention_window;
        tail_start = extend_tail_over_tool_pairs(messages, tail_start);
        CompactionAnalysis {
            preserved_head: Vec::new(),
            middle_chunk: messages[..tail_start].to_vec(),
            preserved_tail: messages[tail_start..].to_vec(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use archiflow_messages::{ToolCall, ToolResultObservation};
    use serde_json::json;

    use super::*;

    fn system(content: &str) -> AgentMessage {
        AgentMessage::System {
            session_id: "t".into(),
            sequence: 0,
            content: content.into(),
        }
    }

    fn user(content: &str) -> AgentMessage {
        AgentMessage::User {
            session_id: "t".into(),
            sequence: 0,
            content: content.into(),
        }
    }

    fn respond(content: &str) -> AgentMessage {
        AgentMessage::Respond {
            session_id: "t".into(),
            sequence: 0,
            content: content.into(),
        }
    }

    fn call(id: &str) -> AgentMessage {
        AgentMessage::ToolCalls {
            session_id: "t".into(),
            thought: None,
            tool_calls: vec![ToolCall::new(id, "read", json!({}))],
        }
    }

    fn result(call_id: &str) -> AgentMessage {
        AgentMessage::ToolResult(ToolResultObservation::success(call_id, "r"))
    }

    // ── SelectiveRetentionStrategy ────────────────────────────────────────────

    #[test]
    fn too_few_messages_is_a_noop() {
        let messages = vec![system("S"), user("Goal"), respond("Response")];
        let analysis = SelectiveRetentionStrategy::new().analyze(&messages, 10);
        assert_eq!(analysis.preserved_head.len(), 3);
        assert!(analysis.is_noop());
        assert!(analysis.preserved_tail.is_empty());
    }

    #[test]
    fn basic_split_into_head_middle_tail() {
        let messages = vec![
            system("System"),
            user("Goal"),
            respond("Middle 1"),
            respond("Middle 2"),
            respond("Middle 3"),
            respond("Tail 1"),
            respond("Tail 2"),
        ];
        let analysis = SelectiveRetentionStrategy::new().analyze(&messages, 2);

        assert_eq!(analysis.preserved_head.len(), 2);
        assert!(matches!(analysis.preserved_head[0], AgentMessage::System { .. }));
        assert!(matches!(analysis.preserved_head[1], AgentMessage::User { .. }));

        let middle: Vec<_> = analysis
            .middle_chunk
            .iter()
            .filter_map(|m| m.content_text())
            .collect();
        assert_eq!(middle, vec!["Middle 1", "Middle 2", "Middle 3"]);

        let tail: Vec<_> = analysis
            .preserved_tail
            .iter()
            .filter_map(|m| m.content_text())
            .collect();
        assert_eq!(tail, vec!["Tail 1", "Tail 2"]);
    }

    #[test]
    fn first_user_message_is_anchored_even_without_system() {
        let messages = vec![
            user("Goal"),
            respond("m1"),
            respond("m2"),
            respond("m3"),
            respond("t1"),
        ];
        let analysis = SelectiveRetentionStrategy::new().analyze(&messages, 1);
        assert_eq!(analysis.preserved_head.len(), 1);
        assert!(matches!(analysis.preserved_head[0], AgentMessage::User { .. }));
    }

    #[test]
    fn tail_extends_backwards_over_tool_pair() {
        let messages = vec![
            system("S"),
            user("goal"),
            respond("old"),
            respond("older"),
            call("c1"),
            result("c1"),
            user("end"),
        ];
        // Window of 2 covers [result(c1), user(end)]; the call must ride along.
        let analysis = SelectiveRetentionStrategy::new().analyze(&messages, 2);
        let tail_kinds: Vec<_> = analysis.preserved_tail.iter().map(|m| m.kind()).collect();
        assert_eq!(
            tail_kinds,
            vec!["ToolCallMessage", "ToolResultObservation", "UserMessage"]
        );
        let middle: Vec<_> = analysis
            .middle_chunk
            .iter()
            .filter_map(|m| m.content_text())
            .collect();
        assert_eq!(middle, vec!["old", "older"]);
    }

    #[test]
    fn batch_result_drags_its_call_message() {
        let batch = AgentMessage::BatchToolResult {
            batch_id: "b1".into(),
            results: vec![
                ToolResultObservation::success("c1", "one"),
                ToolResultObservation::success("c2", "two"),
            ],
        };
        let multi_call = AgentMessage::ToolCalls {
            session_id: "t".into(),
            thought: None,
            tool_calls: vec![
                ToolCall::new("c1", "read", json!({})),
                ToolCall::new("c2", "read", json!({})),
            ],
        };
        let messages = vec![
            system("S"),
            user("goal"),
            respond("m1"),
            respond("m2"),
            multi_call,
            respond("between"),
            batch,
            user("end"),
        ];
        let analysis = SelectiveRetentionStrategy::new().analyze(&messages, 2);
        assert!(
            analysis
                .preserved_tail
                .iter()
                .any(|m| matches!(m, AgentMessage::ToolCalls { .. })),
            "the covering call message must be inside the tail"
        );
    }

    #[test]
    fn completed_pairs_outside_the_window_are_folded() {
        let messages = vec![
            system("S"),
            user("goal"),
            respond("drop me"),
            call("c1"),
            result("c1"),
            call("c2"),
            result("c2"),
            user("end"),
        ];
        // Window 2 covers [result(c2), end]; c2 pulls its call in.  The c1
        // pair is complete and entirely outside the window, so it is folded
        // away without breaking integrity.
        let analysis = SelectiveRetentionStrategy::new().analyze(&messages, 2);
        let tail_kinds: Vec<_> = analysis.preserved_tail.iter().map(|m| m.kind()).collect();
        assert_eq!(
            tail_kinds,
            vec!["ToolCallMessage", "ToolResultObservation", "UserMessage"]
        );
        let middle_kinds: Vec<_> = analysis.middle_chunk.iter().map(|m| m.kind()).collect();
        assert_eq!(
            middle_kinds,
            vec![
                "LLMRespondMessage",
                "ToolCallMessage",
                "ToolResultObservation"
            ]
        );
    }

    #[test]
    fn extension_never_steals_the_anchors() {
        let messages = vec![
            system("S"),
            user("goal"),
            call("c1"),
            result("c1"),
            respond("t"),
        ];
        let analysis = SelectiveRetentionStrategy::new().analyze(&messages, 2);
        assert_eq!(analysis.preserved_head.len() + analysis.middle_chunk.len() + analysis.preserved_tail.len(), 5);
        assert!(matches!(analysis.preserved_head[0], AgentMessage::System { .. }));
    }

    // ── SlidingWindowStrategy ─────────────────────────────────────────────────

    #[test]
    fn sliding_window_keeps_no_anchors() {
        let messages = vec![
            system("S"),
            user("goal"),
            respond("m1"),
            respond("m2"),
            respond("t1"),
            respond("t2"),
        ];
        let analysis = SlidingWindowStrategy::new().analyze(&messages, 2);
        assert!(analysis.preserved_head.is_empty());
        assert_eq!(analysis.middle_chunk.len(), 4);
        assert_eq!(analysis.preserved_tail.len(), 2);
        // The system message is fair game here.
        assert!(matches!(analysis.middle_chunk[0], AgentMessage::System { .. }));
    }

    #[test]
    fn sliding_window_short_history_is_noop() {
        let messages = vec![user("a"), respond("b")];
        let analysis = SlidingWindowStrategy::new().analyze(&messages, 5);
        assert!(analysis.is_noop());
        assert_eq!(analysis.preserved_tail.len(), 2);
    }

    #[test]
    fn sliding_window_extends_over_tool_pairs() {
        let messages = vec![
            user("goal"),
            respond("old"),
            call("c1"),
            respond("between"),
            result("c1"),
            user("end"),
        ];
        let analysis = SlidingWindowStrategy::new().analyze(&messages, 2);
        assert!(
            analysis
                .preserved_tail
                .iter()
                .any(|m| matches!(m, AgentMessage::ToolCalls { .. })),
        );
    }
}
