// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use archiflow_model::{derive_history_budget, ModelConfig, Provider};

use crate::cleaner::{DuplicateCleaner, MessageCleaner, TodoCleaner};
use crate::history::HistoryManager;
use crate::strategy::{CompactionStrategy, SelectiveRetentionStrategy, SlidingWindowStrategy};
use crate::summarizer::{HybridSummarizer, LlmSummarizer, SimpleSummarizer, Summarizer};

/// Fluent construction for [`HistoryManager`].
///
/// ```
/// use archiflow_memory::HistoryBuilder;
///
/// let history = HistoryBuilder::new()
///     .max_tokens(32_000)
///     .retention_window(12)
///     .proactive_threshold(0.8)
///     .sliding_window()
///     .build();
/// assert_eq!(history.retention_window(), 12);
/// ```
pub struct HistoryBuilder {
    max_tokens: usize,
    retention_window: usize,
    proactive_threshold: f64,
    summarizer: Arc<dyn Summarizer>,
    strategy: Box<dyn CompactionStrategy>,
    remove_old_todos: bool,
    dedupe: bool,
}

impl HistoryBuilder {
    pub fn new() -> Self {
        Self {
            max_tokens: 64_000,
            retention_window: 10,
            proactive_threshold: 0.75,
            summarizer: Arc::new(SimpleSummarizer::new()),
            strategy: Box::new(SelectiveRetentionStrategy::new()),
            remove_old_todos: true,
            dedupe: true,
        }
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Derive `max_tokens` from a model's limits and the per-request
    /// overheads that are accounted for separately.
    pub fn for_model(
        mut self,
        model: &ModelConfig,
        system_prompt_tokens: usize,
        tools_tokens: usize,
    ) -> Self {
        self.max_tokens = derive_history_budget(model, system_prompt_tokens, tools_tokens);
        self
    }

    pub fn retention_window(mut self, retention_window: usize) -> Self {
        self.retention_window = retention_window;
        self
    }

    pub fn proactive_threshold(mut self, proactive_threshold: f64) -> Self {
        self.proactive_threshold = proactive_threshold;
        self
    }

    pub fn simple_summarizer(mut self) -> Self {
        self.summarizer = Arc::new(SimpleSummarizer::new());
        self
    }

    pub fn llm_summarizer(mut self, provider: Arc<dyn Provider>, max_summary_tokens: usize) -> Self {
        self.summarizer = Arc::new(LlmSummarizer::new(provider, max_summary_tokens));
        self
    }

    pub fn hybrid_summarizer(
        mut self,
        provider: Arc<dyn Provider>,
        llm_threshold: usize,
        max_summary_tokens: usize,
    ) -> Self {
        self.summarizer = Arc::new(HybridSummarizer::new(
            provider,
            llm_threshold,
            max_summary_tokens,
        ));
        self
    }

    pub fn selective_retention(mut self) -> Self {
        self.strategy = Box::new(SelectiveRetentionStrategy::new());
        self
    }

    pub fn sliding_window(mut self) -> Self {
        self.strategy = Box::new(SlidingWindowStrategy::new());
        self
    }

    /// Toggle removal of superseded internal todo updates.
    pub fn remove_old_todos(mut self, enabled: bool) -> Self {
        self.remove_old_todos = enabled;
        self
    }

    /// Toggle removal of consecutive duplicate messages.
    pub fn dedupe(mut self, enabled: bool) -> Self {
        self.dedupe = enabled;
        self
    }

    // ── Presets ──────────────────────────────────────────────────────────────

    /// Tiny budget, aggressive compaction; for unit tests and toy sessions.
    pub fn minimal() -> Self {
        Self::new()
            .max_tokens(4_000)
            .retention_window(4)
            .proactive_threshold(0.6)
    }

    /// Open-ended chat: no fixed goal, so the sliding window fits better.
    pub fn chat() -> Self {
        Self::new()
            .sliding_window()
            .retention_window(20)
            .proactive_threshold(0.8)
    }

    /// Real task sessions under real budgets: anchored goal, a generous
    /// recent tail, compaction well before the ceiling.
    pub fn production() -> Self {
        Self::new()
            .selective_retention()
            .retention_window(16)
            .proactive_threshold(0.75)
    }

    /// Long-running task sessions: keep the goal anchored and compact early.
    pub fn long_conversation() -> Self {
        Self::new()
            .selective_retention()
            .retention_window(12)
            .proactive_threshold(0.7)
    }

    pub fn build(self) -> HistoryManager {
        let mut cleaners: Vec<Box<dyn MessageCleaner>> = Vec::new();
        if self.remove_old_todos {
            cleaners.push(Box::new(TodoCleaner::new()));
        }
        if self.dedupe {
            cleaners.push(Box::new(DuplicateCleaner::new()));
        }
        HistoryManager::from_parts(
            self.max_tokens,
            self.retention_window,
            self.proactive_threshold,
            self.summarizer,
            self.strategy,
            cleaners,
        )
    }
}

impl Default for HistoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
