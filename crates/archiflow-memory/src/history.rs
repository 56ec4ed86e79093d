// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use archiflow_messages::AgentMessage;
use archiflow_model::ChatMessage;

use crate::cleaner::MessageCleaner;
use crate::llm_format;
use crate::strategy::CompactionStrategy;
use crate::summarizer::{SimpleSummarizer, Summarizer};

/// What a `compact` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionOutcome {
    /// Below threshold, or nothing foldable.
    Skipped,
    Compacted {
        messages_before: usize,
        messages_after: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    /// Even a retention window of 1 could not fit the budget.  History is
    /// left intact; the caller should surface an error observation and let
    /// the provider reject the oversized request.
    StillOverBudget { tokens: usize },
}

/// The bounded conversation log an agent passes to the LLM each step.
///
/// Mutation (`add`, `add_async`, `compact`) keeps three invariants:
/// - every retained tool result has its originating tool call retained at an
///   earlier index;
/// - an index-0 system message and the first user message survive every
///   cleaning and compaction pass;
/// - the trailing `retention_window` messages survive compaction unchanged
///   (modulo the tool-call back-extension, which only adds).
pub struct HistoryManager {
    messages: Vec<AgentMessage>,
    max_tokens: usize,
    retention_window: usize,
    proactive_threshold: f64,
    summarizer: Arc<dyn Summarizer>,
    strategy: Box<dyn CompactionStrategy>,
    cleaners: Vec<Box<dyn MessageCleaner>>,
    token_count: usize,
    llm_view: Option<Arc<Vec<ChatMessage>>>,
    compaction_pending: bool,
    /// Serializes overlapping compactions on the same history (per-history,
    /// not global).
    compaction_gate: Arc<Mutex<()>>,
}

impl HistoryManager {
    pub(crate) fn from_parts(
        max_tokens: usize,
        retention_window: usize,
        proactive_threshold: f64,
        summarizer: Arc<dyn Summarizer>,
        strategy: Box<dyn CompactionStrategy>,
        cleaners: Vec<Box<dyn MessageCleaner>>,
    ) -> Self {
        Self {
            messages: Vec::new(),
            max_tokens,
            retention_window: retention_window.max(1),
            proactive_threshold: proactive_threshold.clamp(0.05, 1.0),
            summarizer,
            strategy,
            cleaners,
            token_count: 0,
            llm_view: None,
            compaction_pending: false,
            compaction_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Manager with the default stack: selective retention, simple
    /// summarization, todo and duplicate cleaning.
    pub fn new(max_tokens: usize) -> Self {
        crate::builder::HistoryBuilder::new().max_tokens(max_tokens).build()
    }

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn retention_window(&self) -> usize {
        self.retention_window
    }

    pub fn compaction_pending(&self) -> bool {
        self.compaction_pending
    }

    /// True once the estimated total crosses the proactive fraction of the
    /// budget.
    pub fn over_threshold(&self) -> bool {
        if self.max_tokens == 0 {
            return false;
        }
        (self.token_count as f64) >= self.proactive_threshold * (self.max_tokens as f64)
    }

    /// Append, clean, and flag compaction when the threshold is crossed.
    /// Compaction itself is deferred; await it via [`Self::add_async`] or
    /// [`Self::compact`].
    pub fn add(&mut self, message: AgentMessage) {
        self.messages.push(message);
        self.run_cleaners();
        self.recalculate();
        self.llm_view = None;
        if self.over_threshold() {
            self.compaction_pending = true;
        }
    }

    /// `add`, then await any pending compaction so the next LLM call sees a
    /// bounded history.
    pub async fn add_async(&mut self, message: AgentMessage) -> anyhow::Result<CompactionOutcome> {
        self.add(message);
        if self.compaction_pending {
            self.compact().await
        } else {
            Ok(CompactionOutcome::Skipped)
        }
    }

    /// Fold the strategy-selected middle of the history into one summary
    /// system message.
    ///
    /// Summarizer failures degrade to the deterministic simple summary; if
    /// the result still exceeds the hard budget the window is halved and the
    /// pass repeated, down to a window of 1.
    pub async fn compact(&mut self) -> anyhow::Result<CompactionOutcome> {
        let gate = Arc::clone(&self.compaction_gate);
        let _guard = gate.lock().await;

        self.compaction_pending = false;
        if !self.over_threshold() {
            return Ok(CompactionOutcome::Skipped);
        }

        let tokens_before = self.token_count;
        let messages_before = self.messages.len();
        let mut window = self.retention_window;
        let mut compacted = false;

        loop {
            let analysis = self.strategy.analyze(&self.messages, window);
            if !analysis.is_noop() {
                let summary_text = self.summarize_chunk(&analysis.middle_chunk).await;
                let summary = AgentMessage::System {
                    session_id: self.session_hint(),
                    sequence: 0,
                    content: format!(
                        "[Compacted {} messages] {summary_text}",
                        analysis.middle_chunk.len()
                    ),
                };

                let mut rebuilt = analysis.preserved_head;
                rebuilt.push(summary);
                rebuilt.extend(analysis.preserved_tail);
                self.messages = rebuilt;
                self.recalculate();
                self.llm_view = None;
                compacted = true;
            }

            if self.token_count <= self.max_tokens {
                break;
            }
            if window <= 1 {
                warn!(
                    tokens = self.token_count,
                    budget = self.max_tokens,
                    "history still over budget after compaction"
                );
                return Ok(CompactionOutcome::StillOverBudget {
                    tokens: self.token_count,
                });
            }
            window = (window / 2).max(1);
        }

        if compacted {
            debug!(
                tokens_before,
                tokens_after = self.token_count,
                messages_before,
                messages_after = self.messages.len(),
                "history compacted"
            );
            Ok(CompactionOutcome::Compacted {
                messages_before,
                messages_after: self.messages.len(),
                tokens_before,
                tokens_after: self.token_count,
            })
        } else {
            Ok(CompactionOutcome::Skipped)
        }
    }

    /// Provider-neutral projection of the history.  Memoized; every mutation
    /// invalidates the cache.
    pub fn to_llm_format(&mut self) -> Arc<Vec<ChatMessage>> {
        if let Some(view) = &self.llm_view {
            return Arc::clone(view);
        }
        let view = Arc::new(llm_format::to_llm_format(&self.messages));
        self.llm_view = Some(Arc::clone(&view));
        view
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.token_count = 0;
        self.llm_view = None;
        self.compaction_pending = false;
    }

    async fn summarize_chunk(&self, chunk: &[AgentMessage]) -> String {
        match self.summarizer.summarize(chunk).await {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, summarizer = self.summarizer.name(), "summarizer failed, degrading to simple summary");
                // The simple summarizer cannot fail.
                SimpleSummarizer::new()
                    .summarize(chunk)
                    .await
                    .unwrap_or_else(|_| format!("{} earlier messages", chunk.len()))
            }
        }
    }

    fn run_cleaners(&mut self) {
        if self.cleaners.is_empty() {
            return;
        }
        let taken = std::mem::take(&mut self.messages);
        self.messages = self
            .cleaners
            .iter()
            .fold(taken, |acc, cleaner| cleaner.clean(acc, self.retention_window));
    }

    fn recalculate(&mut self) {
        self.token_count = self.messages.iter().map(AgentMessage::approx_tokens).sum();
    }

    fn session_hint(&self) -> String {
        self.messages
            .iter()
            .find_map(|m| m.session_id())
            .unwrap_or_default()
            .to_string()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use archiflow_messages::{ToolCall, ToolResultObservation};
    use serde_json::json;

    use super::*;
    use crate::builder::HistoryBuilder;

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

    fn result(id: &str, content: &str) -> AgentMessage {
        AgentMessage::ToolResult(ToolResultObservation::success(id, content))
    }

    /// Tool-call integrity: every retained result has its call earlier.
    fn assert_integrity(messages: &[AgentMessage]) {
        let mut seen: Vec<&str> = Vec::new();
        for msg in messages {
            match msg {
                AgentMessage::ToolCalls { tool_calls, .. } => {
                    seen.extend(tool_calls.iter().map(|tc| tc.id.as_str()));
                }
                AgentMessage::ToolResult(obs) => {
                    assert!(
                        seen.contains(&obs.call_id.as_str()),
                        "orphan tool result {}",
                        obs.call_id
                    );
                }
                AgentMessage::BatchToolResult { results, .. } => {
                    for r in results {
                        assert!(seen.contains(&r.call_id.as_str()), "orphan {}", r.call_id);
                    }
                }
                _ => {}
            }
        }
    }

    #[test]
    fn add_appends_and_counts_tokens() {
        let mut h = HistoryManager::new(10_000);
        h.add(user("12345678"));
        assert_eq!(h.len(), 1);
        assert_eq!(h.token_count(), 2);
    }

    #[test]
    fn add_runs_cleaners() {
        let mut h = HistoryBuilder::new()
            .max_tokens(10_000)
            .retention_window(2)
            .build();
        h.add(user("goal"));
        h.add(AgentMessage::ToolCalls {
            session_id: "t".into(),
            thought: None,
            tool_calls: vec![ToolCall::new("td1", "todo_write", json!({}))],
        });
        h.add(result("td1", "TODO updated"));
        h.add(respond("mid"));
        h.add(respond("tail 1"));
        h.add(respond("tail 2"));
        // The stale todo pair fell out once it left the retention window.
        assert!(!h
            .messages()
            .iter()
            .any(|m| matches!(m, AgentMessage::ToolCalls { .. })));
    }

    #[tokio::test]
    async fn below_threshold_compact_is_skipped() {
        let mut h = HistoryManager::new(10_000);
        h.add(user("short"));
        assert_eq!(h.compact().await.unwrap(), CompactionOutcome::Skipped);
    }

    #[tokio::test]
    async fn add_async_compacts_when_over_threshold() {
        let mut h = HistoryBuilder::new()
            .max_tokens(100)
            .retention_window(2)
            .proactive_threshold(0.5)
            .build();
        h.add(system("sys"));
        h.add(user("the goal"));
        for i in 0..6 {
            h.add(respond(&format!("filler {i} {}", "x".repeat(40))));
        }
        assert!(h.compaction_pending());
        let outcome = h.add_async(user("latest")).await.unwrap();
        assert!(matches!(outcome, CompactionOutcome::Compacted { .. }));
        assert!(h
            .messages()
            .iter()
            .any(|m| m.content_text().is_some_and(|c| c.starts_with("[Compacted"))));
    }

    #[tokio::test]
    async fn compaction_preserves_anchors_and_tail() {
        let mut h = HistoryBuilder::new()
            .max_tokens(100)
            .retention_window(2)
            .proactive_threshold(0.5)
            .build();
        h.add(system("sys prompt"));
        h.add(user("the goal"));
        for i in 0..8 {
            h.add(respond(&format!("noise {i} {}", "y".repeat(30))));
        }
        let pre: Vec<AgentMessage> = h.messages().to_vec();
        let tail_expect: Vec<AgentMessage> = pre[pre.len() - 2..].to_vec();

        h.compact().await.unwrap();

        // Anchor preservation: system still first, a user message survives.
        assert!(matches!(h.messages()[0], AgentMessage::System { .. }));
        assert!(h.messages()[0].content_text() == Some("sys prompt"));
        assert!(h
            .messages()
            .iter()
            .any(|m| m.content_text() == Some("the goal")));
        // Retention window: the last two pre-compaction messages survive as
        // the suffix.
        let n = h.len();
        assert_eq!(&h.messages()[n - 2..], tail_expect.as_slice());
    }

    #[tokio::test]
    async fn compaction_drags_tool_call_into_tail() {
        let mut h = HistoryBuilder::new()
            .max_tokens(200)
            .retention_window(2)
            .proactive_threshold(0.75)
            .build();
        h.add(system("S"));
        h.add(user("goal"));
        h.add(user(&"m".repeat(600))); // ~150 tokens of noise
        h.add(call("c1"));
        h.add(result("c1", "r"));
        h.add(user("end"));

        let outcome = h.compact().await.unwrap();
        assert!(matches!(outcome, CompactionOutcome::Compacted { .. }));
        assert_integrity(h.messages());

        let kinds: Vec<&str> = h.messages().iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "SystemMessage",        // anchor
                "UserMessage",          // goal
                "SystemMessage",        // [Compacted ...]
                "ToolCallMessage",      // dragged along by its result
                "ToolResultObservation",
                "UserMessage"           // end
            ]
        );
    }

    #[tokio::test]
    async fn compact_twice_is_idempotent() {
        let mut h = HistoryBuilder::new()
            .max_tokens(200)
            .retention_window(2)
            .proactive_threshold(0.5)
            .build();
        h.add(system("sys"));
        h.add(user("goal"));
        for i in 0..10 {
            h.add(respond(&format!("chatter {i} {}", "z".repeat(40))));
        }
        h.compact().await.unwrap();
        let after_first: Vec<AgentMessage> = h.messages().to_vec();
        let outcome = h.compact().await.unwrap();
        assert_eq!(outcome, CompactionOutcome::Skipped);
        assert_eq!(h.messages(), after_first.as_slice());
    }

    #[tokio::test]
    async fn summarizer_failure_degrades_to_simple() {
        // An LLM summarizer over an exhausted mock always fails.
        let provider = std::sync::Arc::new(archiflow_model::MockProvider::new());
        let mut h = HistoryBuilder::new()
            .max_tokens(100)
            .retention_window(2)
            .proactive_threshold(0.5)
            .llm_summarizer(provider, 128)
            .build();
        h.add(system("sys"));
        h.add(user("goal"));
        for i in 0..8 {
            h.add(respond(&format!("text {i} {}", "q".repeat(30))));
        }
        let outcome = h.compact().await.unwrap();
        assert!(matches!(outcome, CompactionOutcome::Compacted { .. }));
        let summary = h
            .messages()
            .iter()
            .find_map(|m| m.content_text().filter(|c| c.starts_with("[Compacted")))
            .expect("summary message present");
        assert!(summary.contains("Earlier conversation"), "{summary}");
    }

    #[tokio::test]
    async fn still_over_budget_is_reported() {
        let mut h = HistoryBuilder::new()
            .max_tokens(50)
            .retention_window(4)
            .proactive_threshold(0.5)
            .build();
        h.add(system("sys"));
        h.add(user("goal"));
        // The retention tail alone blows the budget; halving cannot save it
        // because even a window of 1 keeps an oversized message.
        for i in 0..4 {
            h.add(respond(&format!("huge {i} {}", "w".repeat(400))));
        }
        let outcome = h.compact().await.unwrap();
        assert!(matches!(outcome, CompactionOutcome::StillOverBudget { .. }));
        assert_integrity(h.messages());
    }

    #[tokio::test]
    async fn halves_window_until_budget_met() {
        let mut h = HistoryBuilder::new()
            .max_tokens(120)
            .retention_window(8)
            .proactive_threshold(0.5)
            .build();
        h.add(system("sys"));
        h.add(user("goal"));
        for i in 0..10 {
            h.add(respond(&format!("line {i} {}", "e".repeat(60))));
        }
        let outcome = h.compact().await.unwrap();
        assert!(matches!(outcome, CompactionOutcome::Compacted { .. }));
        assert!(h.token_count() <= h.max_tokens());
    }

    #[test]
    fn llm_view_is_cached_until_mutation() {
        let mut h = HistoryManager::new(10_000);
        h.add(user("hello"));
        let first = h.to_llm_format();
        let second = h.to_llm_format();
        assert!(Arc::ptr_eq(&first, &second));

        h.add(respond("hi"));
        let third = h.to_llm_format();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.len(), 2);
    }

    #[test]
    fn clear_resets_everything() {
        let mut h = HistoryManager::new(1_000);
        h.add(user("x"));
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.token_count(), 0);
        assert!(!h.compaction_pending());
    }
}
