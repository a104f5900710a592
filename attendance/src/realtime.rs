//! Real-time channel abstraction used by the view.

use async_trait::async_trait;
use common::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use util::ws::{WebSocketManager, WsClient, WsClientOptions};

use crate::error::{AttendanceError, AttendanceResult};

/// A source of per-topic real-time frames.
///
/// Every successful `subscribe` must be paired with exactly one `release`;
/// [`ChannelSubscription`] does the pairing.
#[async_trait]
pub trait RealtimeChannel: Send + Sync + 'static {
    async fn subscribe(&self, topic: &str) -> AttendanceResult<broadcast::Receiver<String>>;

    fn release(&self, topic: &str);
}

#[async_trait]
impl RealtimeChannel for WebSocketManager {
    async fn subscribe(&self, topic: &str) -> AttendanceResult<broadcast::Receiver<String>> {
        Ok(WebSocketManager::subscribe(self, topic).await)
    }

    fn release(&self, topic: &str) {
        // the receiver is already gone; drop the idle topic if we can
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let hub = self.clone();
            let topic = topic.to_string();
            handle.spawn(async move { hub.prune(&topic).await });
        }
    }
}

#[async_trait]
impl RealtimeChannel for WsClient {
    async fn subscribe(&self, topic: &str) -> AttendanceResult<broadcast::Receiver<String>> {
        WsClient::subscribe(self, topic)
            .await
            .map_err(|e| AttendanceError::Channel(e.to_string()))
    }

    fn release(&self, topic: &str) {
        WsClient::release(self, topic);
    }
}

/// Opens the backend WebSocket named by `config`.
pub async fn connect(config: &AppConfig) -> AttendanceResult<WsClient> {
    let opts = WsClientOptions {
        ping_interval: Duration::from_secs(config.ws_ping_secs.max(1)),
        token: Some(config.auth_token.clone()).filter(|t| !t.is_empty()),
        ..WsClientOptions::default()
    };
    WsClient::connect(&config.ws_url, opts)
        .await
        .map_err(|e| AttendanceError::Channel(e.to_string()))
}

/// A live subscription that is released when dropped.
pub struct ChannelSubscription {
    channel: Arc<dyn RealtimeChannel>,
    topic: String,
    rx: Option<broadcast::Receiver<String>>,
}

impl ChannelSubscription {
    pub async fn open(channel: Arc<dyn RealtimeChannel>, topic: &str) -> AttendanceResult<Self> {
        let rx = channel.subscribe(topic).await?;
        tracing::debug!("Subscribed to '{topic}'");
        Ok(Self {
            channel,
            topic: topic.to_string(),
            rx: Some(rx),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next frame on the topic. Pends forever once the channel has closed.
    pub async fn recv(&mut self) -> Result<String, broadcast::error::RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Stops listening without releasing; used after the sender side closed.
    pub fn park(&mut self) {
        self.rx = None;
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        // receiver first so the hub sees zero listeners on release
        self.rx.take();
        self.channel.release(&self.topic);
        tracing::debug!("Released subscription to '{}'", self.topic);
    }
}
