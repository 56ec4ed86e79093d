// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Utc;

use archiflow_messages::AgentMessage;

use crate::message::Message;

/// Pluggable persistence for the per-topic message log.
///
/// `append` assigns the next dense sequence number for the topic (starting
/// at 0) and returns the stored message; `log` returns a snapshot readers
/// can iterate without holding any broker lock.
pub trait StorageBackend: Send + Sync {
    fn append(&self, topic: &str, payload: AgentMessage) -> Message;
    fn log(&self, topic: &str) -> Vec<Message>;
}

struct TopicLog {
    next_sequence: u64,
    messages: VecDeque<Message>,
}

impl TopicLog {
    fn new() -> Self {
        Self {
            next_sequence: 0,
            messages: VecDeque::new(),
        }
    }
}

/// Reference backend: bounded in-memory queues with per-topic counters.
///
/// When a topic log exceeds `max_log_len`, the oldest entries are evicted.
/// Eviction never rewinds the sequence counter.
pub struct InMemoryBackend {
    topics: Mutex<HashMap<String, TopicLog>>,
    max_log_len: usize,
}

impl InMemoryBackend {
    pub const DEFAULT_MAX_LOG_LEN: usize = 10_000;

    pub fn new() -> Self {
        Self::with_max_log_len(Self::DEFAULT_MAX_LOG_LEN)
    }

    pub fn with_max_log_len(max_log_len: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            max_log_len: max_log_len.max(1),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn append(&self, topic: &str, payload: AgentMessage) -> Message {
        let mut topics = self.topics.lock().unwrap();
        let log = topics
            .entry(topic.to_string())
            .or_insert_with(TopicLog::new);
        let message = Message {
            topic: topic.to_string(),
            sequence: log.next_sequence,
            timestamp: Utc::now(),
            payload,
        };
        log.next_sequence += 1;
        log.messages.push_back(message.clone());
        while log.messages.len() > self.max_log_len {
            log.messages.pop_front();
        }
        message
    }

    fn log(&self, topic: &str) -> Vec<Message> {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|log| log.messages.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn user(content: &str) -> AgentMessage {
        AgentMessage::User {
            session_id: "s".into(),
            sequence: 0,
            content: content.into(),
        }
    }

    #[test]
    fn sequences_are_dense_per_topic() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.append("a", user("1")).sequence, 0);
        assert_eq!(backend.append("a", user("2")).sequence, 1);
        // An unrelated topic has its own counter.
        assert_eq!(backend.append("b", user("3")).sequence, 0);
        assert_eq!(backend.append("a", user("4")).sequence, 2);
    }

    #[test]
    fn log_returns_messages_in_order() {
        let backend = InMemoryBackend::new();
        backend.append("t", user("first"));
        backend.append("t", user("second"));
        let log = backend.log("t");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].sequence, 0);
        assert_eq!(log[1].sequence, 1);
    }

    #[test]
    fn log_of_unknown_topic_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.log("nope").is_empty());
    }

    #[test]
    fn eviction_drops_oldest_but_keeps_counting() {
        let backend = InMemoryBackend::with_max_log_len(2);
        for i in 0..5 {
            backend.append("t", user(&format!("m{i}")));
        }
        let log = backend.log("t");
        assert_eq!(log.len(), 2);
        // The retained suffix keeps its original sequence numbers.
        assert_eq!(log[0].sequence, 3);
        assert_eq!(log[1].sequence, 4);
    }
}
