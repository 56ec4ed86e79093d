use std::time::Duration;

/// Execution constraints applied to tool calls.  Policies are registered
/// with the runtime manager by name and referenced from call requests as a
/// pure data key.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPolicy {
    pub name: String,
    /// Which registered runtime executes calls under this policy.
    pub default_runtime: String,
    /// Hard cap on a single tool execution.
    pub max_execution_time: Duration,
    pub allow_network: bool,
}

impl SecurityPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_execution_time(mut self, max_execution_time: Duration) -> Self {
        self.max_execution_time = max_execution_time;
        self
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.default_runtime = runtime.into();
        self
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            name: "default".into(),
            default_runtime: "local".into(),
            max_execution_time: Duration::from_secs(30),
            allow_network: true,
        }
    }
}
