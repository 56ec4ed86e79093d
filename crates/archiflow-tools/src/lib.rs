// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod registry;
pub mod tool;

pub use builtin::todo_write::{TodoItem, TodoWriteTool};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{
    is_internal_tool, ExecutionContext, Tool, ToolResult, INTERNAL_TOOL_PREFIXES,
};
