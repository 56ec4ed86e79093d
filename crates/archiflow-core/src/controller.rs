// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use archiflow_bus::{Message, MessageBroker, Subscriber, SubscriptionId, TopicContext};
use archiflow_config::ConfigHierarchy;
use archiflow_messages::{AgentMessage, CallContext, ToolCallRequest};
use archiflow_model::Provider;

use crate::agent::Agent;
use crate::preprocessor::{PromptPreprocessor, RefinementOptions};

/// Drives one session: feeds `agent.<sid>` traffic into the agent one step
/// at a time and routes the agent's outbound events to `client.<sid>` and
/// `runtime.<sid>`.
///
/// Failure policy: a failed step or a failed publish to the runtime topic
/// stops the session (tool results would never arrive); a failed publish to
/// the client topic is logged and tolerated.
pub struct AgentController {
    agent: Mutex<Box<dyn Agent>>,
    broker: Arc<MessageBroker>,
    topics: TopicContext,
    hierarchy: ConfigHierarchy,
    preprocessor_provider: Arc<dyn Provider>,
    preprocessor: RwLock<Arc<PromptPreprocessor>>,
    security_policy: String,
    stopped: AtomicBool,
    finished: AtomicBool,
    subscription: StdMutex<Option<SubscriptionId>>,
}

impl AgentController {
    /// Build a controller for `agent`, loading configuration from
    /// `working_dir` and binding the preprocessor to the resolved snapshot.
    ///
    /// Config errors (malformed settings files) propagate; they are never
    /// swallowed here.
    pub fn new(
        agent: Box<dyn Agent>,
        broker: Arc<MessageBroker>,
        topics: TopicContext,
        working_dir: impl Into<std::path::PathBuf>,
        preprocessor_provider: Arc<dyn Provider>,
    ) -> anyhow::Result<Arc<Self>> {
        Self::with_hierarchy(
            agent,
            broker,
            topics,
            ConfigHierarchy::new(working_dir),
            preprocessor_provider,
        )
    }

    /// Like [`Self::new`] but with a caller-supplied hierarchy (tests point
    /// the global layer away from the real home directory).
    pub fn with_hierarchy(
        agent: Box<dyn Agent>,
        broker: Arc<MessageBroker>,
        topics: TopicContext,
        hierarchy: ConfigHierarchy,
        preprocessor_provider: Arc<dyn Provider>,
    ) -> anyhow::Result<Arc<Self>> {
        let snapshot = hierarchy.load()?;
        let preprocessor = Arc::new(PromptPreprocessor::from_sources(
            Arc::clone(&preprocessor_provider),
            RefinementOptions::default(),
            Some(&snapshot),
        ));
        Ok(Arc::new(Self {
            agent: Mutex::new(agent),
            broker,
            topics,
            hierarchy,
            preprocessor_provider,
            preprocessor: RwLock::new(preprocessor),
            security_policy: "default".into(),
            stopped: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            subscription: StdMutex::new(None),
        }))
    }

    /// Subscribe the dispatch handler to the session's agent topic.
    pub fn attach(self: &Arc<Self>) {
        let subscription = self
            .broker
            .subscribe(self.topics.agent_topic(), Arc::clone(self) as Arc<dyn Subscriber>);
        *self.subscription.lock().unwrap() = Some(subscription);
        info!(topic = self.topics.agent_topic(), "agent controller attached");
    }

    pub fn detach(&self) {
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            self.broker.unsubscribe(&subscription);
        }
    }

    pub fn topics(&self) -> &TopicContext {
        &self.topics
    }

    /// The agent emitted `AgentFinishedMessage`.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// The session no longer accepts inbound events.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Recompute the config snapshot from disk and swap the preprocessor.
    /// A step already in progress continues with the prior configuration.
    pub fn reload_config(&self) -> anyhow::Result<()> {
        let snapshot = self.hierarchy.reload()?;
        let preprocessor = Arc::new(PromptPreprocessor::from_sources(
            Arc::clone(&self.preprocessor_provider),
            RefinementOptions::default(),
            Some(&snapshot),
        ));
        *self.preprocessor.write().unwrap() = preprocessor;
        info!("controller configuration reloaded");
        Ok(())
    }

    async fn publish_client(&self, payload: AgentMessage) {
        if let Err(publish_error) = self
            .broker
            .publish(self.topics.client_topic(), payload)
            .await
        {
            warn!(
                topic = self.topics.client_topic(),
                %publish_error,
                "failed to publish client event"
            );
        }
    }

    async fn stop_session(&self, reason: String) {
        self.stopped.store(true, Ordering::SeqCst);
        error!(session_id = self.topics.session_id(), reason = %reason, "session stopped");
        self.publish_client(AgentMessage::ErrorEvent {
            session_id: self.topics.session_id().to_string(),
            content: reason,
        })
        .await;
    }

    async fn dispatch(&self, message: Message) {
        if self.is_stopped() {
            debug!(sequence = message.sequence, "session stopped, dropping event");
            return;
        }

        let mut payload = message.payload;
        if matches!(payload, AgentMessage::User { .. }) {
            let preprocessor = Arc::clone(&self.preprocessor.read().unwrap());
            let (rewritten, notification) = preprocessor.process(&payload).await;
            payload = rewritten;
            if let Some(notification) = notification {
                self.publish_client(notification).await;
            }
        }

        // Exactly one step in flight per session.
        let (events, running) = {
            let mut agent = self.agent.lock().await;
            match agent.step(payload).await {
                Ok(events) => (events, agent.is_running()),
                Err(step_error) => {
                    self.stop_session(format!("agent step failed: {step_error}")).await;
                    return;
                }
            }
        };

        for event in events {
            match event {
                AgentMessage::Respond { .. } | AgentMessage::Think { .. } => {
                    self.publish_client(event).await;
                }
                AgentMessage::Finished { .. } => {
                    self.finished.store(true, Ordering::SeqCst);
                    self.publish_client(event).await;
                }
                AgentMessage::ToolCalls {
                    session_id,
                    tool_calls,
                    ..
                } => {
                    if tool_calls.is_empty() {
                        warn!("agent emitted an empty tool call message");
                        continue;
                    }
                    let context = CallContext {
                        session_id: session_id.clone(),
                        working_directory: self
                            .hierarchy
                            .working_dir()
                            .display()
                            .to_string(),
                        security_policy: self.security_policy.clone(),
                    };
                    let mut calls: Vec<ToolCallRequest> = tool_calls
                        .iter()
                        .map(|tc| ToolCallRequest {
                            session_id: session_id.clone(),
                            call_id: tc.id.clone(),
                            tool_name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                            context: context.clone(),
                        })
                        .collect();
                    let request = if calls.len() == 1 {
                        AgentMessage::ToolCallRequest(calls.remove(0))
                    } else {
                        AgentMessage::BatchToolCallRequest {
                            session_id: session_id.clone(),
                            batch_id: uuid::Uuid::new_v4().to_string(),
                            calls,
                        }
                    };
                    if let Err(publish_error) = self
                        .broker
                        .publish(self.topics.runtime_topic(), request)
                        .await
                    {
                        // Tool results would never arrive; the session is dead.
                        self.stop_session(format!(
                            "failed to dispatch tool calls: {publish_error}"
                        ))
                        .await;
                        return;
                    }
                }
                other => {
                    warn!(kind = other.kind(), "unexpected outbound event from agent");
                }
            }
        }

        // The agent went quiet (stop or finish): drop whatever arrives next.
        if !running {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Subscriber for AgentController {
    async fn on_message(&self, message: Message) -> anyhow::Result<()> {
        self.dispatch(message).await;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
