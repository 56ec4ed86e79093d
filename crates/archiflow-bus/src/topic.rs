/// The three topics owned by one session: `agent.<sid>`, `runtime.<sid>`,
/// `client.<sid>`.  `<sid>` is an opaque string (letters, digits, hyphen,
/// underscore); no cross-session ordering exists between contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicContext {
    session_id: String,
    agent: String,
    runtime: String,
    client: String,
}

impl TopicContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            agent: format!("agent.{session_id}"),
            runtime: format!("runtime.{session_id}"),
            client: format!("client.{session_id}"),
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Inbound events for the agent loop.
    pub fn agent_topic(&self) -> &str {
        &self.agent
    }

    /// Tool call requests for the runtime executor.
    pub fn runtime_topic(&self) -> &str {
        &self.runtime
    }

    /// Client-visible events (responses, mirrors, errors).
    pub fn client_topic(&self) -> &str {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_derived_from_session_id() {
        let ctx = TopicContext::new("s-1_a");
        assert_eq!(ctx.agent_topic(), "agent.s-1_a");
        assert_eq!(ctx.runtime_topic(), "runtime.s-1_a");
        assert_eq!(ctx.client_topic(), "client.s-1_a");
        assert_eq!(ctx.session_id(), "s-1_a");
    }
}
