// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

/// Tool names with these prefixes are internal bookkeeping: their results
/// are fed back to the agent but never mirrored onto the client stream.
pub const INTERNAL_TOOL_PREFIXES: &[&str] = &["todo_"];

/// Whether `name` belongs to the internal-tool set.
pub fn is_internal_tool(name: &str) -> bool {
    INTERNAL_TOOL_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Ambient context handed to every tool execution.  Tools interpret relative
/// paths against `working_directory`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub session_id: String,
    pub working_directory: PathBuf,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            working_directory: working_directory.into(),
        }
    }
}

/// The outcome of executing a tool.
///
/// `output` carries the text fed back to the model on success; `error`
/// carries the human-readable reason on failure.  `data` is an optional
/// structured payload for callers that want more than text.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            data: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Trait every tool must implement.
///
/// Failures should be reported through [`ToolResult::err`], not by panicking;
/// the executor converts panics and timeouts into error observations itself.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, arguments: &Value, context: &ExecutionContext) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
