//! Subscriber registry and broadcaster.
//!
//! Subscribers are registered with an opaque [`SubscriberSink`] and a random
//! [`ConnectionId`]. A broadcast snapshots the current members of a topic,
//! releases the lock and sends to all of them concurrently. A subscriber
//! whose send fails or does not finish within the send timeout is removed
//! and closed; the others still receive the message.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use aisrelay_core::PositionReport;
use aisrelay_protocol::{encode_subscriber_message, SubscriberMessage};
use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Failure to deliver a message to one subscriber.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("subscriber connection closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound half of a subscriber connection.
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), SinkError>;

    /// Called once the subscriber has been removed from the registry.
    async fn close(&self) {}
}

/// Default time one subscriber may take to accept a message.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Opaque subscriber token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Broadcast topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PositionUpdates,
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub removed: usize,
}

struct Subscriber {
    sink: Arc<dyn SubscriberSink>,
    topics: HashSet<Topic>,
}

/// Registry of connected subscribers.
pub struct SubscriberRegistry {
    connections: RwLock<HashMap<ConnectionId, Subscriber>>,
    send_timeout: Duration,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long a single send may take before the subscriber is dropped.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Register a subscriber with no topics.
    pub async fn connect(&self, sink: Arc<dyn SubscriberSink>) -> ConnectionId {
        let id = ConnectionId::generate();
        let mut connections = self.connections.write().await;
        connections.insert(
            id,
            Subscriber {
                sink,
                topics: HashSet::new(),
            },
        );
        info!(connection = %id, total = connections.len(), "Subscriber connected");
        id
    }

    /// Add a topic to a subscriber. Returns `false` for an unknown id.
    pub async fn subscribe(&self, id: ConnectionId, topic: Topic) -> bool {
        match self.connections.write().await.get_mut(&id) {
            Some(subscriber) => {
                subscriber.topics.insert(topic);
                debug!(connection = %id, ?topic, "Subscribed");
                true
            }
            None => false,
        }
    }

    /// Remove a subscriber from all topics and close its sink. Safe to call
    /// repeatedly.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(&id);
            if removed.is_some() {
                info!(connection = %id, total = connections.len(), "Subscriber disconnected");
            }
            removed
        };

        match removed {
            Some(subscriber) => {
                subscriber.sink.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Ids of all registered subscribers.
    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().copied().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of subscribers of `topic`.
    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|s| s.topics.contains(&topic))
            .count()
    }

    /// Push a `position_update` with `reports` to every position subscriber.
    pub async fn broadcast_position_update(&self, reports: &[PositionReport]) -> BroadcastOutcome {
        let message = SubscriberMessage::position_update(reports.to_vec());
        match encode_subscriber_message(&message) {
            Ok(text) => self.broadcast(Topic::PositionUpdates, text).await,
            Err(e) => {
                warn!(error = %e, "Failed to encode position update");
                BroadcastOutcome::default()
            }
        }
    }

    /// Send `text` to every subscriber of `topic`.
    pub async fn broadcast(&self, topic: Topic, text: String) -> BroadcastOutcome {
        let targets: Vec<(ConnectionId, Arc<dyn SubscriberSink>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, s)| s.topics.contains(&topic))
                .map(|(id, s)| (*id, s.sink.clone()))
                .collect()
        };

        if targets.is_empty() {
            return BroadcastOutcome::default();
        }

        let send_timeout = self.send_timeout;
        let sends = targets.into_iter().map(|(id, sink)| {
            let text = text.clone();
            async move {
                let result = match timeout(send_timeout, sink.send_text(text)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout(send_timeout)),
                };
                (id, result)
            }
        });
        let results = join_all(sends).await;

        let mut outcome = BroadcastOutcome::default();
        for (id, result) in results {
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(connection = %id, error = %e, "Send failed, dropping subscriber");
                    // Already gone if it disconnected while the send was in flight.
                    if self.disconnect(id).await {
                        outcome.removed += 1;
                    }
                }
            }
        }
        outcome
    }
}
