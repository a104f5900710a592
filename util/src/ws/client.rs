//! Multiplexed WebSocket client.
//!
//! One socket carries every topic this process listens to. Subscriptions are
//! reference counted per topic: the first local subscriber sends a `subscribe`
//! frame, the last [`release`](WsClient::release) sends `unsubscribe`. Inbound
//! `event` frames are fanned out to local receivers through a
//! [`WebSocketManager`] hub, untouched (subscribers get the raw envelope text).

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use url::Url;

use super::manager::{Receiver, WebSocketManager};
use super::types::{ClientMessage, ClientTopic, ServerMessage};

#[derive(Debug, thiserror::Error)]
pub enum WsClientError {
    #[error("Invalid WebSocket URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("WebSocket handshake failed: {0}")]
    Connect(#[from] tungstenite::Error),

    #[error("Topic '{0}' cannot be subscribed over this socket")]
    UnsupportedTopic(String),

    #[error("WebSocket connection is closed")]
    Closed,

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct WsClientOptions {
    /// Interval of app-level `{"type":"ping"}` frames.
    pub ping_interval: Duration,
    /// Bearer token, sent as the `token` query parameter on the handshake.
    pub token: Option<String>,
    pub outbound_capacity: usize,
    pub topic_capacity: usize,
}

impl Default for WsClientOptions {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            token: None,
            outbound_capacity: 64,
            topic_capacity: 100,
        }
    }
}

/// Aborts the socket tasks once the last client clone is gone.
struct SocketTasks(Vec<JoinHandle<()>>);

impl Drop for SocketTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct WsClient {
    hub: WebSocketManager,
    out_tx: mpsc::Sender<Message>,
    topics: Arc<Mutex<HashMap<String, usize>>>,
    connected: Arc<AtomicBool>,
    _tasks: Arc<SocketTasks>,
}

impl WsClient {
    /// Opens the socket and starts the writer, reader and ping tasks.
    pub async fn connect(url: &str, opts: WsClientOptions) -> Result<Self, WsClientError> {
        let mut url = Url::parse(url)?;
        let endpoint = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        if let Some(token) = opts.token.as_deref().filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair("token", token);
        }

        let req = url.as_str().into_client_request()?;
        let (stream, _) = connect_async(req).await?;
        tracing::info!("WS connected to {endpoint}");

        let (mut sink, mut source) = stream.split();
        let hub = WebSocketManager::with_capacity(opts.topic_capacity);
        let topics: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
        let connected = Arc::new(AtomicBool::new(true));

        // Outbound queue and writer task
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(opts.outbound_capacity.max(1));
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // S→C: route events to local subscribers
        let reader = {
            let hub = hub.clone();
            let topics = Arc::clone(&topics);
            let connected = Arc::clone(&connected);
            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => dispatch(&hub, &topics, text.as_str()).await,
                        Ok(Message::Close(_)) => break,
                        // tungstenite answers WS-level pings itself
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("WS read failed on {endpoint}: {e}");
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
                tracing::info!("WS session ended for {endpoint}");
                hub.close_all().await;
            })
        };

        // App-level periodic ping
        let ping = {
            let out_tx = out_tx.clone();
            let every = opts.ping_interval.max(Duration::from_millis(10));
            tokio::spawn(async move {
                let mut ticker = time::interval_at(Instant::now() + every, every);
                loop {
                    ticker.tick().await;
                    let Ok(frame) = encode(&ClientMessage::Ping) else {
                        break;
                    };
                    if out_tx.send(frame).await.is_err() {
                        break;
                    }
                }
            })
        };

        Ok(Self {
            hub,
            out_tx,
            topics,
            connected,
            _tasks: Arc::new(SocketTasks(vec![writer, reader, ping])),
        })
    }

    /// Subscribes to `topic`, announcing it to the server on first use.
    ///
    /// The local receiver is registered before the frame goes out, so no event
    /// acknowledged after the subscription can be missed.
    pub async fn subscribe(&self, topic: &str) -> Result<Receiver, WsClientError> {
        let client_topic = ClientTopic::from_path(topic)
            .ok_or_else(|| WsClientError::UnsupportedTopic(topic.to_string()))?;
        if !self.is_connected() {
            return Err(WsClientError::Closed);
        }

        let rx = self.hub.subscribe(topic).await;
        let first = {
            let mut topics = self.lock_topics();
            let count = topics.entry(topic.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first {
            let frame = encode(&ClientMessage::Subscribe {
                topics: vec![client_topic],
                since: None,
            })?;
            if self.out_tx.send(frame).await.is_err() {
                self.lock_topics().remove(topic);
                return Err(WsClientError::Closed);
            }
            tracing::debug!("WS subscribed to '{topic}'");
        }
        Ok(rx)
    }

    /// Gives back one subscription to `topic`; the last one unsubscribes on the server.
    ///
    /// Synchronous so it can run from `Drop`.
    pub fn release(&self, topic: &str) {
        let last = {
            let mut topics = self.lock_topics();
            match topics.get_mut(topic) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    topics.remove(topic);
                    true
                }
                None => false,
            }
        };
        if !last {
            return;
        }

        let Some(client_topic) = ClientTopic::from_path(topic) else {
            return;
        };
        let sent = encode(&ClientMessage::Unsubscribe {
            topics: vec![client_topic],
        })
        .map_err(WsClientError::from)
        .and_then(|frame| {
            self.out_tx
                .try_send(frame)
                .map_err(|_| WsClientError::Closed)
        });
        match sent {
            Ok(()) => tracing::debug!("WS unsubscribed from '{topic}'"),
            Err(e) => tracing::warn!("WS could not unsubscribe from '{topic}': {e}"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.out_tx.is_closed()
    }

    /// Topics with at least one local subscriber.
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock_topics().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// The local fan-out hub fed by this socket.
    pub fn hub(&self) -> &WebSocketManager {
        &self.hub
    }

    fn lock_topics(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        lock(&self.topics)
    }
}

fn lock(topics: &Mutex<HashMap<String, usize>>) -> MutexGuard<'_, HashMap<String, usize>> {
    topics.lock().unwrap_or_else(|p| p.into_inner())
}

fn encode(msg: &ClientMessage) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(msg)?.into()))
}

async fn dispatch(hub: &WebSocketManager, topics: &Mutex<HashMap<String, usize>>, raw: &str) {
    match serde_json::from_str::<ServerMessage>(raw) {
        Ok(ServerMessage::Event { topic, event, .. }) => {
            let delivered = hub.broadcast(&topic, raw).await;
            tracing::trace!("WS '{event}' on '{topic}' delivered to {delivered} listener(s)");
        }
        Ok(ServerMessage::Ready { policy_version, .. }) => {
            tracing::debug!("WS ready (policy v{policy_version})");
        }
        Ok(ServerMessage::SubscribeOk { accepted, rejected }) => {
            tracing::debug!("WS subscribe accepted: {accepted:?}");
            for (topic, reason) in rejected {
                tracing::warn!("WS subscribe to '{topic}' rejected: {reason}");
                // the server will send nothing; end local listeners and forget the count
                lock(topics).remove(&topic);
                hub.close_topic(&topic).await;
            }
        }
        Ok(ServerMessage::UnsubscribeOk { topics }) => {
            tracing::debug!("WS unsubscribe ok: {topics:?}");
        }
        Ok(ServerMessage::Pong) => tracing::trace!("WS pong"),
        Ok(ServerMessage::Error { code, message, .. }) => {
            tracing::warn!("WS server error {code}: {message}");
        }
        Err(e) => tracing::warn!("WS invalid frame: {e}; raw={raw}"),
    }
}
