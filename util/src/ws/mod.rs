// util/src/ws/mod.rs
pub mod client;
pub mod manager;
pub mod types;

pub use client::{WsClient, WsClientError, WsClientOptions};
pub use manager::WebSocketManager;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standard event envelope carried on WebSocket topics.
#[derive(Serialize)]
pub struct EventEnvelope<'a, T> {
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'a str,
    pub topic: &'a str,
    pub payload: T,
    pub ts: String,
}

/// Owned form of [`EventEnvelope`] for the receiving side.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceivedEnvelope<T> {
    #[serde(rename = "type")]
    pub r#type: String,
    pub event: String,
    pub topic: String,
    pub payload: T,
    #[serde(default)]
    pub ts: Option<String>,
}

/// Serializes an [`EventEnvelope`] for `event` on `topic`.
pub fn envelope_json<T: Serialize>(topic: &str, event: &str, payload: &T) -> serde_json::Result<String> {
    serde_json::to_string(&EventEnvelope {
        r#type: "event",
        event,
        topic,
        payload,
        ts: Utc::now().to_rfc3339(),
    })
}

/// Broadcast a JSON-serialized `EventEnvelope` on `topic`.
pub async fn emit<T: Serialize>(ws: &WebSocketManager, topic: &str, event: &str, payload: &T) {
    match envelope_json(topic, event, payload) {
        Ok(json) => {
            ws.broadcast(topic, json).await;
        }
        Err(e) => tracing::warn!("Dropping '{event}' on '{topic}': {e}"),
    }
}
