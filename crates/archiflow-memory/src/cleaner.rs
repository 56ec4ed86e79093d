// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use archiflow_messages::AgentMessage;

/// A pass that removes stale messages before compaction.  Cleaners are pure
/// on the list: same input, same output, no side effects.
///
/// Two messages are sacrosanct for every cleaner: a system message sitting
/// at index 0 and the first user message (the session goal).  Messages
/// inside the retention window (the trailing `retention_window` entries)
/// are likewise never removed.
pub trait MessageCleaner: Send + Sync {
    fn name(&self) -> &str;
    fn clean(&self, messages: Vec<AgentMessage>, retention_window: usize) -> Vec<AgentMessage>;
}

/// Index of the first message the retention window protects.
fn protected_from(len: usize, retention_window: usize) -> usize {
    len.saturating_sub(retention_window)
}

/// Indices no cleaner may drop: system prompt at 0 and the first user turn.
fn anchor_indices(messages: &[AgentMessage]) -> HashSet<usize> {
    let mut anchors = HashSet::new();
    if matches!(messages.first(), Some(AgentMessage::System { .. })) {
        anchors.insert(0);
    }
    if let Some(idx) = messages
        .iter()
        .position(|m| matches!(m, AgentMessage::User { .. }))
    {
        anchors.insert(idx);
    }
    anchors
}

/// Removes paired tool-call/tool-result messages for the internal todo tool
/// when both sides lie outside the retention window.  Only the latest todo
/// state matters; superseded updates are dead weight in the context.
pub struct TodoCleaner {
    tool_prefix: String,
}

impl TodoCleaner {
    pub fn new() -> Self {
        Self {
            tool_prefix: "todo_".into(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            tool_prefix: prefix.into(),
        }
    }

    fn is_todo_call(&self, message: &AgentMessage) -> bool {
        match message {
            AgentMessage::ToolCalls { tool_calls, .. } => {
                !tool_calls.is_empty()
                    && tool_calls.iter().all(|tc| tc.name.starts_with(&self.tool_prefix))
            }
            _ => false,
        }
    }
}

impl Default for TodoCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCleaner for TodoCleaner {
    fn name(&self) -> &str {
        "todo"
    }

    fn clean(&self, messages: Vec<AgentMessage>, retention_window: usize) -> Vec<AgentMessage> {
        let protected = protected_from(messages.len(), retention_window);
        let anchors = anchor_indices(&messages);

        // Collect the call ids of droppable todo calls, then drop the calls
        // and any results that answer them.
        let mut drop: HashSet<usize> = HashSet::new();
        for (idx, message) in messages.iter().enumerate() {
            if idx >= protected || anchors.contains(&idx) || !self.is_todo_call(message) {
                continue;
            }
            let AgentMessage::ToolCalls { tool_calls, .. } = message else {
                continue;
            };
            // The whole pair must be outside the window; if any result sits
            // inside it, keep both sides intact.
            let ids: HashSet<&str> = tool_calls.iter().map(|tc| tc.id.as_str()).collect();
            let result_indices: Vec<usize> = messages
                .iter()
                .enumerate()
                .filter(|(_, m)| match m {
                    AgentMessage::ToolResult(obs) => ids.contains(obs.call_id.as_str()),
                    _ => false,
                })
                .map(|(i, _)| i)
                .collect();
            if result_indices.iter().any(|&i| i >= protected) {
                continue;
            }
            drop.insert(idx);
            drop.extend(result_indices);
        }

        messages
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !drop.contains(idx))
            .map(|(_, m)| m)
            .collect()
    }
}

/// Removes a message identical in kind and content to its (kept) immediate
/// predecessor, unless it lies in the retention window.
pub struct DuplicateCleaner;

impl DuplicateCleaner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DuplicateCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCleaner for DuplicateCleaner {
    fn name(&self) -> &str {
        "duplicate"
    }

    fn clean(&self, messages: Vec<AgentMessage>, retention_window: usize) -> Vec<AgentMessage> {
        let protected = protected_from(messages.len(), retention_window);
        let anchors = anchor_indices(&messages);

        let mut kept: Vec<AgentMessage> = Vec::with_capacity(messages.len());
        for (idx, message) in messages.into_iter().enumerate() {
            let duplicate = idx < protected
                && !anchors.contains(&idx)
                && kept.last().is_some_and(|prev| {
                    prev.kind() == message.kind()
                        && prev.content_text().is_some()
                        && prev.content_text() == message.content_text()
                });
            if !duplicate {
                kept.push(message);
            }
        }
        kept
    }
}

/// Applies a list of cleaners in order.
pub struct CompositeCleaner {
    cleaners: Vec<Box<dyn MessageCleaner>>,
}

impl CompositeCleaner {
    pub fn new(cleaners: Vec<Box<dyn MessageCleaner>>) -> Self {
        Self { cleaners }
    }
}

impl MessageCleaner for CompositeCleaner {
    fn name(&self) -> &str {
        "composite"
    }

    fn clean(&self, messages: Vec<AgentMessage>, retention_window: usize) -> Vec<AgentMessage> {
        self.cleaners
            .iter()
            .fold(messages, |acc, cleaner| cleaner.clean(acc, retention_window))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
