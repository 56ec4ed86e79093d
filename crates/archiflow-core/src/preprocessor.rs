// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use archiflow_config::{ConfigSnapshot, RefinementSettings};
use archiflow_messages::AgentMessage;
use archiflow_model::{ChatMessage, Provider};

const DEFAULT_THRESHOLD: f64 = 8.0;
const DEFAULT_MIN_LENGTH: usize = 10;

const REFINER_PROMPT: &str = "\
You are a prompt quality analyst for a software engineering agent. \
Assess the user prompt below and, if it is vague or underspecified, rewrite \
it into a precise, actionable prompt that preserves the user's intent. \
Respond with ONLY a JSON object of this exact shape:\n\
{\"quality_score\": <number 0-10>, \"refined_prompt\": \"<rewritten prompt>\", \
\"task_type\": \"<short label>\", \"refinement_level\": \"<pass_through|light_touch|full_transformation>\"}";

/// Explicit constructor parameters; anything left `None` falls through to
/// the config snapshot, then the environment, then built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct RefinementOptions {
    pub enabled: Option<bool>,
    pub threshold: Option<f64>,
    pub min_length: Option<usize>,
}

/// Environment fallbacks, captured once at construction.
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    enabled: Option<bool>,
    threshold: Option<f64>,
    min_length: Option<usize>,
}

impl EnvOverrides {
    fn capture() -> Self {
        Self {
            enabled: std::env::var("AUTO_REFINE_PROMPTS").ok().and_then(|v| parse_bool(&v)),
            threshold: std::env::var("AUTO_REFINE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok()),
            min_length: std::env::var("AUTO_REFINE_MIN_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct Refinement {
    quality_score: f64,
    refined_prompt: String,
    #[serde(default)]
    task_type: String,
    #[serde(default)]
    refinement_level: String,
}

/// Rewrites low-quality user prompts before they reach the agent.
///
/// The preprocessor is a sibling of the agent, invoked by the controller:
/// enabling or disabling it leaves the agent's system prompt and history
/// untouched except for the content of the single delivered user message.
pub struct PromptPreprocessor {
    provider: Arc<dyn Provider>,
    enabled: bool,
    threshold: f64,
    min_length: usize,
}

impl PromptPreprocessor {
    pub fn new(provider: Arc<dyn Provider>, enabled: bool, threshold: f64, min_length: usize) -> Self {
        Self {
            provider,
            enabled,
            threshold,
            min_length,
        }
    }

    /// Resolve settings with the documented precedence: explicit options,
    /// then the config snapshot (`autoRefinement.*`), then the
    /// `AUTO_REFINE_*` environment variables, then defaults (disabled,
    /// threshold 8.0, min length 10).
    pub fn from_sources(
        provider: Arc<dyn Provider>,
        options: RefinementOptions,
        snapshot: Option<&ConfigSnapshot>,
    ) -> Self {
        let settings = snapshot
            .map(RefinementSettings::from_snapshot)
            .unwrap_or_default();
        Self::resolve(provider, options, settings, EnvOverrides::capture())
    }

    fn resolve(
        provider: Arc<dyn Provider>,
        options: RefinementOptions,
        settings: RefinementSettings,
        env: EnvOverrides,
    ) -> Self {
        Self {
            provider,
            enabled: options
                .enabled
                .or(settings.enabled)
                .or(env.enabled)
                .unwrap_or(false),
            threshold: options
                .threshold
                .or(settings.threshold)
                .or(env.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            min_length: options
                .min_length
                .or(settings.min_length)
                .or(env.min_length)
                .unwrap_or(DEFAULT_MIN_LENGTH),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Possibly rewrite a user message.  Returns the message to deliver to
    /// the agent plus an optional client notification describing the
    /// substitution.  Every failure path returns the original unchanged.
    pub async fn process(&self, message: &AgentMessage) -> (AgentMessage, Option<AgentMessage>) {
        let AgentMessage::User {
            session_id,
            sequence,
            content,
        } = message
        else {
            return (message.clone(), None);
        };

        if !self.enabled || content.len() < self.min_length || content.starts_with('/') {
            return (message.clone(), None);
        }

        let refinement = match self.refine(content).await {
            Ok(r) => r,
            Err(error) => {
                debug!(%error, "prompt refinement failed, passing original through");
                return (message.clone(), None);
            }
        };

        if refinement.quality_score >= self.threshold
            || refinement.refined_prompt.trim().is_empty()
        {
            return (message.clone(), None);
        }

        debug!(
            quality_score = refinement.quality_score,
            level = %refinement.refinement_level,
            "substituting refined prompt"
        );
        let refined = AgentMessage::User {
            session_id: session_id.clone(),
            sequence: *sequence,
            content: refinement.refined_prompt.clone(),
        };
        let notification = AgentMessage::PromptRefined {
            session_id: session_id.clone(),
            original: content.clone(),
            refined: refinement.refined_prompt,
            quality_score: refinement.quality_score,
            task_type: refinement.task_type,
        };
        (refined, Some(notification))
    }

    async fn refine(&self, prompt: &str) -> anyhow::Result<Refinement> {
        let request = format!("{REFINER_PROMPT}\n\nUser prompt:\n{prompt}");
        let response = self
            .provider
            .generate(&[ChatMessage::user(request)], &[])
            .await
            .context("refiner call failed")?;
        let content = response.content.context("refiner returned no content")?;
        let object =
            extract_json_object(&content).context("refiner output contained no JSON object")?;
        let refinement: Refinement =
            serde_json::from_value(object).context("refiner JSON had unexpected shape")?;
        Ok(refinement)
    }
}

/// Extract the first parseable JSON object from text that may wrap it in
/// markdown fences or surround it with prose.
pub fn extract_json_object(text: &str) -> Option<Value> {
    // Prefer a fenced block when present.
    if let Some(fenced) = fenced_block(text) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced.trim()) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    // Otherwise scan for balanced braces, string-aware.
    let bytes = text.as_bytes();
    for start in 0..bytes.len() {
        if bytes[start] != b'{' {
            continue;
        }
        if let Some(end) = matching_brace(text, start) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    // Skip an optional language tag up to the first newline.
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
