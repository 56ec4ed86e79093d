// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use archiflow_tools::{ExecutionContext, Tool, ToolResult};

/// A concrete execution environment for tool calls.
///
/// Implementations enforce `max_execution_time` themselves so that a timed
/// out call is actually cancelled, not merely abandoned.
#[async_trait]
pub trait Runtime: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(
        &self,
        tool: Arc<dyn Tool>,
        arguments: &Value,
        context: &ExecutionContext,
        max_execution_time: Duration,
    ) -> anyhow::Result<ToolResult>;
}

/// Runs tools in-process on the local task pool.
///
/// Each call gets its own task so a panicking tool is isolated from the
/// executor; on timeout the task is aborted and the elapsed time reported.
pub struct LocalRuntime;

impl LocalRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    async fn execute(
        &self,
        tool: Arc<dyn Tool>,
        arguments: &Value,
        context: &ExecutionContext,
        max_execution_time: Duration,
    ) -> anyhow::Result<ToolResult> {
        let arguments = arguments.clone();
        let context = context.clone();
        let started = Instant::now();
        let handle = tokio::spawn(async move { tool.execute(&arguments, &context).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(max_execution_time, handle).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(join_error)) => anyhow::bail!("tool execution panicked: {join_error}"),
            Err(_) => {
                abort.abort();
                anyhow::bail!("Timeout after {:.1}s", started.elapsed().as_secs_f32())
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
