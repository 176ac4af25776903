use crate::{BusError, Message, MessagePattern, MessagePriority, WorkerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use uuid::Uuid;

/// Handler invoked for each message a subscription matches
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), WorkerError>;
}

struct Subscription {
    id: Uuid,
    worker_id: String,
    pattern: MessagePattern,
    handler: Arc<dyn MessageHandler>,
}

/// Lifecycle events observable alongside normal delivery
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum BusEvent {
    MessagePublished {
        message_id: Uuid,
        message_type: String,
        timestamp: DateTime<Utc>,
    },
    MessageDelivered {
        message_id: Uuid,
        subscription_id: Uuid,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    DeliveryError {
        message_id: Uuid,
        subscription_id: Uuid,
        worker_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: Uuid,
        workflow_id: String,
        status: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

struct Waiter {
    request_id: Uuid,
    sender: oneshot::Sender<Message>,
}

/// In-process publish/subscribe router with a bounded history ring.
///
/// Owned by the orchestrator instance, not a process-wide singleton.
/// History does not survive restarts and delivery is best-effort.
pub struct MessageBus {
    subscriptions: RwLock<Vec<Subscription>>,
    history: Mutex<VecDeque<Message>>,
    history_capacity: usize,
    waiters: Mutex<HashMap<Uuid, Waiter>>,
    events: broadcast::Sender<BusEvent>,
}

pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

impl MessageBus {
    pub fn new(history_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            subscriptions: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            waiters: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub async fn subscribe(
        &self,
        worker_id: impl Into<String>,
        pattern: MessagePattern,
        handler: Arc<dyn MessageHandler>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let worker_id = worker_id.into();
        tracing::debug!(subscription = %id, worker = %worker_id, "subscribing");
        self.subscriptions.write().await.push(Subscription {
            id,
            worker_id,
            pattern,
            handler,
        });
        id
    }

    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() < before
    }

    /// Publish a message: record it in history, resolve any correlation
    /// waiter, and deliver to matching subscriptions.
    ///
    /// Matching subscriptions are ranked exact-target first, then by the
    /// pattern's declared priority (a pattern without one ranks at the
    /// message's own priority). Delivery of one message walks that order;
    /// a failing handler is logged and reported as a `DeliveryError`
    /// event without blocking the remaining subscribers. Returns the
    /// number of successful deliveries.
    pub async fn publish(&self, message: Message) -> usize {
        {
            let mut history = self.history.lock().await;
            if history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(message.clone());
        }

        let _ = self.events.send(BusEvent::MessagePublished {
            message_id: message.id,
            message_type: message.message_type.clone(),
            timestamp: Utc::now(),
        });

        if let Some(correlation_id) = message.metadata.correlation_id {
            let mut waiters = self.waiters.lock().await;
            let resolves = waiters
                .get(&correlation_id)
                .map_or(false, |w| w.request_id != message.id);
            if resolves {
                if let Some(waiter) = waiters.remove(&correlation_id) {
                    let _ = waiter.sender.send(message.clone());
                }
            }
        }

        let mut matching: Vec<(Uuid, String, MessagePriority, bool, Arc<dyn MessageHandler>)> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|s| s.pattern.matches(&message))
                .map(|s| {
                    (
                        s.id,
                        s.worker_id.clone(),
                        s.pattern.priority.unwrap_or(message.metadata.priority),
                        s.pattern.is_exact_target(&message),
                        Arc::clone(&s.handler),
                    )
                })
                .collect()
        };
        matching.sort_by_key(|(_, _, priority, exact_target, _)| {
            (Reverse(*exact_target), Reverse(*priority))
        });

        let mut delivered = 0;
        for (subscription_id, worker_id, _, _, handler) in matching {
            match handler.handle(message.clone()).await {
                Ok(()) => {
                    delivered += 1;
                    let _ = self.events.send(BusEvent::MessageDelivered {
                        message_id: message.id,
                        subscription_id,
                        worker_id,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        message = %message.id,
                        subscription = %subscription_id,
                        worker = %worker_id,
                        error = %e,
                        "delivery failed"
                    );
                    let _ = self.events.send(BusEvent::DeliveryError {
                        message_id: message.id,
                        subscription_id,
                        worker_id,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
        delivered
    }

    /// Publish a request and await a response message carrying the same
    /// correlation id, up to `timeout`. A missing correlation id is
    /// assigned before publishing; the request itself never resolves its
    /// own waiter.
    pub async fn request(
        &self,
        mut message: Message,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let correlation_id = *message
            .metadata
            .correlation_id
            .get_or_insert_with(Uuid::new_v4);
        let (sender, receiver) = oneshot::channel();
        self.waiters.lock().await.insert(
            correlation_id,
            Waiter {
                request_id: message.id,
                sender,
            },
        );

        self.publish(message).await;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.waiters.lock().await.remove(&correlation_id);
                Err(BusError::ChannelClosed)
            }
            Err(_) => {
                self.waiters.lock().await.remove(&correlation_id);
                Err(BusError::ResponseTimeout {
                    ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Snapshot of retained messages, optionally filtered by pattern.
    pub async fn history(&self, filter: Option<&MessagePattern>) -> Vec<Message> {
        let history = self.history.lock().await;
        match filter {
            Some(pattern) => history.iter().filter(|m| pattern.matches(m)).cloned().collect(),
            None => history.iter().cloned().collect(),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: BusEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
