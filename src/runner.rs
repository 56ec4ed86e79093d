// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! High-level, reusable entry point for running one agent session on the
//! full fabric: broker, controller, runtime executor, and a client-topic
//! completion watcher.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{info, warn};

use archiflow_bus::{Message, MessageBroker, Subscriber, TopicContext};
use archiflow_core::{Agent, AgentController};
use archiflow_messages::AgentMessage;
use archiflow_model::Provider;
use archiflow_runtime::{RuntimeExecutor, RuntimeManager, SecurityPolicy};
use archiflow_tools::ToolRegistry;

/// Configuration for a single agent run.
pub struct RunnerConfig {
    /// Directory configuration is loaded from and tools resolve paths
    /// against.
    pub working_directory: PathBuf,
    /// Session id for the run.  An agent that carries its own id wins;
    /// this value covers agents that do not (empty id).  When both are
    /// absent a fresh id is generated.
    pub session_id: Option<String>,
    /// Initial task sent as the first user message.  `None` leaves the
    /// session waiting for input published by the caller.
    pub initial_message: Option<String>,
    /// Overall wall-clock cap; on expiry a stop message drains the session.
    pub timeout: Duration,
    /// Cap for a single tool execution.
    pub max_tool_execution_time: Duration,
    pub allow_network: bool,
    /// Tools available to the runtime executor.
    pub registry: Arc<ToolRegistry>,
    /// Pre-configured broker; a fresh in-memory broker when absent.
    pub broker: Option<Arc<MessageBroker>>,
    /// Pre-configured runtime manager; local runtime with the derived
    /// security policy when absent.
    pub runtime_manager: Option<Arc<RuntimeManager>>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from("."),
            session_id: None,
            initial_message: None,
            timeout: Duration::from_secs(1200),
            max_tool_execution_time: Duration::from_secs(30),
            allow_network: true,
            registry: Arc::new(ToolRegistry::new()),
            broker: None,
            runtime_manager: None,
        }
    }
}

/// Outcome of one agent run.
#[derive(Debug, Clone)]
pub struct RunnerResult {
    pub success: bool,
    pub reason: String,
    pub session_id: String,
    pub execution_time: Duration,
}

/// Resolves once the session reaches a terminal client event.
struct CompletionWatcher {
    done: Mutex<Option<oneshot::Sender<(bool, String)>>>,
}

#[async_trait]
impl Subscriber for CompletionWatcher {
    async fn on_message(&self, message: Message) -> anyhow::Result<()> {
        let outcome = match &message.payload {
            AgentMessage::Finished { reason } => Some((true, reason.clone())),
            AgentMessage::ErrorEvent { content, .. } => Some((false, content.clone())),
            _ => None,
        };
        if let Some(outcome) = outcome {
            if let Some(tx) = self.done.lock().unwrap().take() {
                let _ = tx.send(outcome);
            }
        }
        Ok(())
    }
}

/// Install a default `tracing` subscriber honoring `RUST_LOG`.  Safe to call
/// repeatedly; only the first call wins.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Run `agent` to completion on a freshly wired session.
///
/// `llm` backs the prompt preprocessor (commonly the same provider the
/// agent uses).  Returns once the agent finishes, the session errors out,
/// or `config.timeout` elapses, in which case a stop message is published
/// and the session drained.  The broker is stopped before returning, so
/// every in-flight event has landed.
pub async fn run_agent(
    agent: Box<dyn Agent>,
    llm: Arc<dyn Provider>,
    config: RunnerConfig,
) -> anyhow::Result<RunnerResult> {
    let started = Instant::now();
    let session_id = match agent.session_id() {
        "" => config
            .session_id
            .clone()
            .unwrap_or_else(|| format!("agent-{}", uuid::Uuid::new_v4())),
        sid => sid.to_string(),
    };
    info!(session_id = %session_id, "agent execution starting");

    let broker = config
        .broker
        .unwrap_or_else(|| Arc::new(MessageBroker::in_memory()));
    broker.start();

    let runtime_manager = config.runtime_manager.unwrap_or_else(|| {
        let policy = SecurityPolicy {
            max_execution_time: config.max_tool_execution_time,
            allow_network: config.allow_network,
            ..SecurityPolicy::default()
        };
        Arc::new(RuntimeManager::local(policy))
    });

    let topics = TopicContext::new(&session_id);
    let controller = AgentController::new(
        agent,
        Arc::clone(&broker),
        topics.clone(),
        &config.working_directory,
        llm,
    )
    .context("building agent controller")?;
    controller.attach();

    let executor = RuntimeExecutor::new(
        Arc::clone(&broker),
        runtime_manager,
        config.registry,
        topics.clone(),
    );
    executor.start();

    let (done_tx, done_rx) = oneshot::channel();
    let watcher = Arc::new(CompletionWatcher {
        done: Mutex::new(Some(done_tx)),
    });
    broker.subscribe(topics.client_topic(), watcher);

    if let Some(initial) = &config.initial_message {
        broker
            .publish(
                topics.agent_topic(),
                AgentMessage::User {
                    session_id: session_id.clone(),
                    sequence: 0,
                    content: initial.clone(),
                },
            )
            .await
            .context("publishing initial message")?;
    }

    let (success, reason) = match tokio::time::timeout(config.timeout, done_rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => (false, "completion watcher dropped".to_string()),
        Err(_) => {
            warn!(timeout = ?config.timeout, "session timed out, draining");
            let stop = AgentMessage::Stop {
                reason: format!("Timeout after {}s", config.timeout.as_secs()),
            };
            if let Err(publish_error) = broker.publish(topics.agent_topic(), stop).await {
                warn!(%publish_error, "failed to publish stop message");
            }
            (false, format!("Timeout after {}s", config.timeout.as_secs()))
        }
    };

    executor.stop();
    broker.stop().await;

    let result = RunnerResult {
        success,
        reason,
        session_id,
        execution_time: started.elapsed(),
    };
    info!(
        success = result.success,
        reason = %result.reason,
        elapsed = ?result.execution_time,
        "agent execution complete"
    );
    Ok(result)
}
