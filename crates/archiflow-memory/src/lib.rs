// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod builder;
mod cleaner;
mod history;
mod llm_format;
mod strategy;
mod summarizer;

pub use builder::HistoryBuilder;
pub use cleaner::{CompositeCleaner, DuplicateCleaner, MessageCleaner, TodoCleaner};
pub use history::{CompactionOutcome, HistoryManager};
pub use llm_format::to_llm_format;
pub use strategy::{
    CompactionAnalysis, CompactionStrategy, SelectiveRetentionStrategy, SlidingWindowStrategy,
};
pub use summarizer::{HybridSummarizer, LlmSummarizer, SimpleSummarizer, Summarizer};
