// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{ExecutionContext, Tool, ToolResult};

/// A structured todo item managed by the todo_write tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
}

const VALID_STATUSES: &[&str] = &["pending", "in_progress", "completed", "cancelled"];

/// Internal session todo list.  Calling the tool replaces the entire list
/// (not a merge/patch); only one item may be in_progress at a time.
///
/// The `todo_` prefix keeps this tool's results off the client stream.
pub struct TodoWriteTool {
    todos: Arc<Mutex<Vec<TodoItem>>>,
}

impl TodoWriteTool {
    pub fn new() -> Self {
        Self {
            todos: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Share the backing list so callers can display it.
    pub fn shared(todos: Arc<Mutex<Vec<TodoItem>>>) -> Self {
        Self { todos }
    }

    pub fn snapshot(&self) -> Vec<TodoItem> {
        self.todos.lock().unwrap().clone()
    }
}

impl Default for TodoWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current session. \
         Calling this tool replaces the entire list. Each item requires a \
         unique id, content, and a status out of pending, in_progress, \
         completed, cancelled. Keep at most one item in_progress."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Array of todo items to set (replaces existing list)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": VALID_STATUSES
                            }
                        },
                        "required": ["id", "content", "status"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(&self, arguments: &Value, context: &ExecutionContext) -> ToolResult {
        let items: Vec<TodoItem> = match arguments.get("todos") {
            Some(v) => match serde_json::from_value(v.clone()) {
                Ok(items) => items,
                Err(e) => return ToolResult::err(format!("invalid todos payload: {e}")),
            },
            None => return ToolResult::err("missing required parameter: todos"),
        };

        if let Some(bad) = items
            .iter()
            .find(|t| !VALID_STATUSES.contains(&t.status.as_str()))
        {
            return ToolResult::err(format!(
                "invalid status '{}' for todo '{}'",
                bad.status, bad.id
            ));
        }
        let in_progress = items.iter().filter(|t| t.status == "in_progress").count();
        if in_progress > 1 {
            return ToolResult::err("only one todo may be in_progress at a time");
        }

        debug!(
            session_id = %context.session_id,
            count = items.len(),
            "todo list replaced"
        );
        let count = items.len();
        *self.todos.lock().unwrap() = items;
        ToolResult::ok(format!("Todo list updated ({count} items)"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
