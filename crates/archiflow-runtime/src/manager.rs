// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use serde_json::Value;
use tracing::debug;

use archiflow_tools::{ExecutionContext, Tool, ToolResult};

use crate::runtime::Runtime;
use crate::security::SecurityPolicy;

/// Resolves a request's policy name to a registered [`SecurityPolicy`] and
/// the runtime it selects, then delegates execution under that policy's
/// time cap.
pub struct RuntimeManager {
    runtimes: HashMap<String, Arc<dyn Runtime>>,
    policies: HashMap<String, SecurityPolicy>,
    default_policy: SecurityPolicy,
}

impl RuntimeManager {
    pub fn new(default_policy: SecurityPolicy) -> Self {
        let mut policies = HashMap::new();
        policies.insert(default_policy.name.clone(), default_policy.clone());
        Self {
            runtimes: HashMap::new(),
            policies,
            default_policy,
        }
    }

    /// Manager with the default policy and a local runtime, the common case.
    pub fn local(default_policy: SecurityPolicy) -> Self {
        let mut manager = Self::new(default_policy);
        manager.register_runtime("local", Arc::new(crate::runtime::LocalRuntime::new()));
        manager
    }

    pub fn register_runtime(&mut self, name: impl Into<String>, runtime: Arc<dyn Runtime>) {
        self.runtimes.insert(name.into(), runtime);
    }

    pub fn register_policy(&mut self, policy: SecurityPolicy) {
        self.policies.insert(policy.name.clone(), policy);
    }

    /// The policy registered under `name`, or the default when unknown.
    pub fn policy(&self, name: &str) -> &SecurityPolicy {
        self.policies.get(name).unwrap_or(&self.default_policy)
    }

    /// Execute `tool` under the named policy.  Fails when the policy selects
    /// a runtime that was never registered.
    pub async fn execute_tool(
        &self,
        tool: Arc<dyn Tool>,
        arguments: &Value,
        context: &ExecutionContext,
        policy_name: &str,
    ) -> anyhow::Result<ToolResult> {
        let policy = self.policy(policy_name);
        let Some(runtime) = self.runtimes.get(&policy.default_runtime) else {
            bail!(
                "policy '{}' selects unknown runtime '{}'",
                policy.name,
                policy.default_runtime
            );
        };
        debug!(
            tool = tool.name(),
            runtime = runtime.name(),
            policy = policy.name,
            "executing tool"
        );
        runtime
            .execute(tool, arguments, context, policy.max_execution_time)
            .await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, arguments: &Value, _context: &ExecutionContext) -> ToolResult {
            ToolResult::ok(arguments.to_string())
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("s", "/tmp")
    }

    #[tokio::test]
    async fn executes_under_default_policy() {
        let manager = RuntimeManager::local(SecurityPolicy::default());
        let result = manager
            .execute_tool(Arc::new(EchoTool), &json!({"a": 1}), &ctx(), "default")
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn unknown_policy_falls_back_to_default() {
        let manager = RuntimeManager::local(SecurityPolicy::default());
        let result = manager
            .execute_tool(Arc::new(EchoTool), &json!({}), &ctx(), "no-such-policy")
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn policy_selecting_missing_runtime_fails() {
        let mut manager = RuntimeManager::local(SecurityPolicy::default());
        manager.register_policy(
            SecurityPolicy::new("sandboxed")
                .with_runtime("container")
                .with_max_execution_time(Duration::from_secs(1)),
        );
        let err = manager
            .execute_tool(Arc::new(EchoTool), &json!({}), &ctx(), "sandboxed")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown runtime"), "{err}");
    }

    #[test]
    fn named_policies_are_resolvable() {
        let mut manager = RuntimeManager::new(SecurityPolicy::default());
        manager.register_policy(SecurityPolicy::new("strict"));
        assert_eq!(manager.policy("strict").name, "strict");
        assert_eq!(manager.policy("absent").name, "default");
    }
}
