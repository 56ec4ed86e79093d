// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use archiflow_bus::{Message, MessageBroker, Subscriber, SubscriptionId, TopicContext};
use archiflow_messages::{
    AgentMessage, BatchMetadata, ToolCallRequest, ToolResultObservation,
};
use archiflow_tools::{is_internal_tool, ExecutionContext, ToolRegistry};

use crate::manager::RuntimeManager;

/// Converts tool-call requests on `runtime.<sid>` into concurrent tool
/// executions and routes results back onto the bus.
///
/// Results for the agent go to `agent.<sid>`; client-facing mirrors go to
/// `client.<sid>` unless the tool is internal (`todo_` prefix).  Within a
/// batch all calls run concurrently, but the aggregate observation reports
/// them in batch input order, exactly once.
pub struct RuntimeExecutor {
    broker: Arc<MessageBroker>,
    manager: Arc<RuntimeManager>,
    registry: Arc<ToolRegistry>,
    topics: TopicContext,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl RuntimeExecutor {
    pub fn new(
        broker: Arc<MessageBroker>,
        manager: Arc<RuntimeManager>,
        registry: Arc<ToolRegistry>,
        topics: TopicContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            manager,
            registry,
            topics,
            subscription: Mutex::new(None),
        })
    }

    /// Subscribe to the session's runtime topic.
    pub fn start(self: &Arc<Self>) {
        let subscription = self
            .broker
            .subscribe(self.topics.runtime_topic(), Arc::clone(self) as Arc<dyn Subscriber>);
        *self.subscription.lock().unwrap() = Some(subscription);
        info!(topic = self.topics.runtime_topic(), "runtime executor listening");
    }

    /// Stop receiving new requests.  In-flight executions still publish.
    pub fn stop(&self) {
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            self.broker.unsubscribe(&subscription);
        }
    }

    async fn execute_one(&self, request: &ToolCallRequest) -> ToolResultObservation {
        let Some(tool) = self.registry.get(&request.tool_name) else {
            return ToolResultObservation::error(
                &request.call_id,
                format!("Tool not found: {}", request.tool_name),
            );
        };
        let context = ExecutionContext::new(
            &request.context.session_id,
            &request.context.working_directory,
        );
        match self
            .manager
            .execute_tool(
                tool,
                &request.arguments,
                &context,
                &request.context.security_policy,
            )
            .await
        {
            Ok(result) if result.success => {
                ToolResultObservation::success(&request.call_id, result.output)
            }
            Ok(result) => ToolResultObservation::error(
                &request.call_id,
                format!(
                    "Error: {}",
                    result.error.unwrap_or_else(|| "tool failed".into())
                ),
            ),
            Err(error) => {
                ToolResultObservation::error(&request.call_id, format!("Error: {error}"))
            }
        }
    }

    /// Publish on the agent topic.  Failure here would stall the agent, so
    /// one error observation is attempted before giving up.
    async fn publish_to_agent(&self, payload: AgentMessage) {
        let topic = self.topics.agent_topic();
        if let Err(publish_error) = self.broker.publish(topic, payload).await {
            error!(topic, %publish_error, "failed to publish tool result to agent");
            let fallback = AgentMessage::Error {
                content: format!("tool result could not be delivered: {publish_error}"),
            };
            if let Err(second) = self.broker.publish(topic, fallback).await {
                error!(topic, %second, "giving up on error observation");
            }
        }
    }

    /// Publish a client mirror; failures are logged, never escalated.
    async fn publish_to_client(&self, payload: AgentMessage) {
        if let Err(publish_error) = self
            .broker
            .publish(self.topics.client_topic(), payload)
            .await
        {
            warn!(
                topic = self.topics.client_topic(),
                %publish_error,
                "failed to mirror tool result to client"
            );
        }
    }

    async fn handle_single(&self, request: ToolCallRequest) {
        debug!(
            call_id = %request.call_id,
            tool = %request.tool_name,
            session_id = %request.session_id,
            "tool call request"
        );
        let observation = self.execute_one(&request).await;
        let mirror = (!is_internal_tool(&request.tool_name)).then(|| AgentMessage::ToolResultEvent {
            session_id: request.session_id.clone(),
            call_id: observation.call_id.clone(),
            tool_name: request.tool_name.clone(),
            result: observation.content.clone(),
            status: observation.status,
            metadata: None,
        });

        self.publish_to_agent(AgentMessage::ToolResult(observation))
            .await;
        if let Some(mirror) = mirror {
            self.publish_to_client(mirror).await;
        } else {
            debug!(tool = %request.tool_name, "internal tool, client mirror suppressed");
        }
    }

    async fn handle_batch(
        &self,
        session_id: String,
        batch_id: String,
        calls: Vec<ToolCallRequest>,
    ) {
        debug!(batch_id = %batch_id, size = calls.len(), "batch tool call request");
        let started = Instant::now();
        // All calls run concurrently; join_all keeps batch input order.
        let results: Vec<ToolResultObservation> =
            join_all(calls.iter().map(|request| self.execute_one(request))).await;
        let batch_total_time = started.elapsed().as_secs_f64();

        self.publish_to_agent(AgentMessage::BatchToolResult {
            batch_id: batch_id.clone(),
            results: results.clone(),
        })
        .await;

        let batch_size = calls.len();
        for (index, (request, observation)) in calls.iter().zip(results.iter()).enumerate() {
            if is_internal_tool(&request.tool_name) {
                debug!(tool = %request.tool_name, batch_id = %batch_id, "internal tool, client mirror suppressed");
                continue;
            }
            self.publish_to_client(AgentMessage::ToolResultEvent {
                session_id: session_id.clone(),
                call_id: observation.call_id.clone(),
                tool_name: request.tool_name.clone(),
                result: observation.content.clone(),
                status: observation.status,
                metadata: Some(BatchMetadata {
                    batch_id: batch_id.clone(),
                    batch_total_time,
                    sequence_in_batch: index + 1,
                    batch_size,
                }),
            })
            .await;
        }
    }
}

#[async_trait]
impl Subscriber for RuntimeExecutor {
    async fn on_message(&self, message: Message) -> anyhow::Result<()> {
        match message.payload {
            AgentMessage::ToolCallRequest(request) => self.handle_single(request).await,
            AgentMessage::BatchToolCallRequest {
                session_id,
                batch_id,
                calls,
            } => self.handle_batch(session_id, batch_id, calls).await,
            other => {
                debug!(kind = other.kind(), "ignoring non-request on runtime topic");
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
