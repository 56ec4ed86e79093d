// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use archiflow_messages::AgentMessage;

use crate::message::Message;
use crate::storage::{InMemoryBackend, StorageBackend};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker is stopped; publish to '{topic}' rejected")]
    Stopped { topic: String },
}

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionId {
    topic: String,
    id: u64,
}

/// A registered message handler.  The broker serializes invocations per
/// subscription: one worker, FIFO, so every subscriber observes its topic
/// in sequence order.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_message(&self, message: Message) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bound of each subscription's delivery queue.  A full queue makes
    /// `publish` wait; see [`MessageBroker::publish`].
    pub queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<Message>,
}

/// In-process topic bus with per-topic total ordering and at-least-once
/// delivery to every live subscriber.
///
/// Publish order on a topic is the delivery order every subscriber of that
/// topic observes; subscribers of the same topic run concurrently with each
/// other, but each individual subscriber is invoked serially.  Across topics
/// no ordering is defined.
pub struct MessageBroker {
    backend: Box<dyn StorageBackend>,
    config: BrokerConfig,
    running: AtomicBool,
    next_subscription_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<SubscriberSlot>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageBroker {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self::with_config(backend, BrokerConfig::default())
    }

    pub fn with_config(backend: impl StorageBackend + 'static, config: BrokerConfig) -> Self {
        Self {
            backend: Box::new(backend),
            config,
            running: AtomicBool::new(false),
            next_subscription_id: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Broker over the reference in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(InMemoryBackend::new())
    }

    /// Accept publishes.  A freshly constructed broker is stopped.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reject new publishes, release all subscriber queues, and wait for the
    /// delivery workers to drain what was already enqueued.
    ///
    /// Subscriptions do not survive a stop; a restarted broker starts with
    /// an empty subscriber set.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.subscribers.lock().unwrap().clear();
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().unwrap();
            guard.drain(..).collect()
        };
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(%error, "broker delivery worker panicked");
            }
        }
    }

    /// Assign the next sequence for `topic`, persist the message in the topic
    /// log, and enqueue it for every current subscriber.  Returns the
    /// assigned sequence.
    ///
    /// Overflow policy: subscriber queues are bounded and a full queue makes
    /// this call *wait* until the subscriber catches up.  Backpressure is the
    /// single documented behavior; messages are never silently dropped for a
    /// live subscriber.
    pub async fn publish(&self, topic: &str, payload: AgentMessage) -> Result<u64, BrokerError> {
        if !self.is_running() {
            return Err(BrokerError::Stopped {
                topic: topic.to_string(),
            });
        }
        let message = self.backend.append(topic, payload);

        // Snapshot the subscriber set so registration and removal stay safe
        // concurrent with dispatch.
        let targets: Vec<mpsc::Sender<Message>> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers
                .get(topic)
                .map(|slots| slots.iter().map(|s| s.tx.clone()).collect())
                .unwrap_or_default()
        };

        for tx in targets {
            if tx.send(message.clone()).await.is_err() {
                // Unsubscribed (or broker stopped) between snapshot and send.
                debug!(
                    topic,
                    sequence = message.sequence,
                    "subscriber queue closed during dispatch"
                );
            }
        }
        Ok(message.sequence)
    }

    /// Register `subscriber` for every message published to `topic` from now
    /// on.  The handler runs on a subscription-private worker task.
    pub fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Message>(self.config.queue_capacity);

        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let topic = message.topic.clone();
                let sequence = message.sequence;
                if let Err(error) = subscriber.on_message(message).await {
                    // A failing handler must not take the broker down or end
                    // the subscription.
                    warn!(topic = %topic, sequence, %error, "subscriber handler failed");
                }
            }
        });

        self.subscribers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(SubscriberSlot { id, tx });
        self.workers.lock().unwrap().push(worker);

        debug!(topic, subscription = id, "subscribed");
        SubscriptionId {
            topic: topic.to_string(),
            id,
        }
    }

    /// Stop new deliveries for `subscription`.  Messages already enqueued may
    /// still reach the handler while its queue drains.
    pub fn unsubscribe(&self, subscription: &SubscriptionId) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(slots) = subscribers.get_mut(&subscription.topic) {
            slots.retain(|s| s.id != subscription.id);
        }
    }

    /// Read-only snapshot of the messages published to `topic` so far.
    pub fn log(&self, topic: &str) -> Vec<Message> {
        self.backend.log(topic)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
