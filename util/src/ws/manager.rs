//! A thread-safe topic hub for fanning real-time messages out to local listeners.
//!
//! Uses Tokio broadcast channels per topic. The [`WsClient`](super::client::WsClient)
//! feeds it from the socket; in-process producers (and tests) can publish to it
//! directly.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

/// Type alias for topic name.
type Topic = String;

/// Sender for a topic's broadcast channel.
type Sender = broadcast::Sender<String>;

/// Receiver for a topic's broadcast channel.
pub type Receiver = broadcast::Receiver<String>;

const DEFAULT_CAPACITY: usize = 100;

/// Manages broadcast channels per topic.
///
/// - Lazily creates broadcast channels per topic on first subscription
/// - Removes topics when their subscriber count drops to zero after sending
/// - [`close_topic`](Self::close_topic) drops one sender and
///   [`close_all`](Self::close_all) drops every sender so receivers observe `Closed`
#[derive(Clone)]
pub struct WebSocketManager {
    inner: Arc<RwLock<HashMap<Topic, Sender>>>,
    capacity: usize,
}

impl Default for WebSocketManager {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl WebSocketManager {
    /// Creates a new, empty `WebSocketManager`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hub whose per-topic channels buffer `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribes to the given topic, creating it if necessary.
    pub async fn subscribe(&self, topic: &str) -> Receiver {
        let mut map = self.inner.write().await;
        map.entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Broadcasts a message to all subscribers of `topic`.
    ///
    /// If the topic does not exist, it's a no-op.
    /// If the topic has zero subscribers after sending, it is removed.
    /// Returns how many receivers the message was delivered to.
    pub async fn broadcast<T: Into<String>>(&self, topic: &str, msg: T) -> usize {
        let mut map = self.inner.write().await;
        let Some(sender) = map.get(topic) else {
            return 0;
        };
        let delivered = sender.send(msg.into()).unwrap_or(0);
        if sender.receiver_count() == 0 {
            tracing::debug!("Removing topic '{topic}' due to no subscribers.");
            map.remove(topic);
        }
        delivered
    }

    /// Number of live receivers on `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .read()
            .await
            .get(topic)
            .map_or(0, |s| s.receiver_count())
    }

    /// Drops `topic` if nobody listens to it anymore.
    pub async fn prune(&self, topic: &str) {
        let mut map = self.inner.write().await;
        if map.get(topic).is_some_and(|s| s.receiver_count() == 0) {
            map.remove(topic);
        }
    }

    /// Drops `topic` even if it still has listeners; they drain what is
    /// buffered, then see `Closed`. Returns whether the topic existed.
    pub async fn close_topic(&self, topic: &str) -> bool {
        let removed = self.inner.write().await.remove(topic).is_some();
        if removed {
            tracing::debug!("Closed topic '{topic}'");
        }
        removed
    }

    /// Drops every topic. Pending receivers drain what is buffered, then see `Closed`.
    pub async fn close_all(&self) {
        let mut map = self.inner.write().await;
        if !map.is_empty() {
            tracing::debug!("Closing {} topic(s)", map.len());
        }
        map.clear();
    }

    pub async fn has_topic(&self, topic: &str) -> bool {
        self.inner.read().await.contains_key(topic)
    }
}
