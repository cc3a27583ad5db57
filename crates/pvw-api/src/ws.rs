//! WebSocket fan-out.
//!
//! Clients subscribe to topics (`jobs`, `jobs:<job_id>`, `files:<file_id>`,
//! `scans`, ...) and receive every [`EventEnvelope`] published on those
//! topics. The manager keeps two maps: connection id to subscribed topics
//! and topic to subscriber ids. Dead connections are dropped lazily when a
//! send fails, and by the heartbeat monitor once they go quiet for
//! `timeout_factor` heartbeat intervals.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast::error::RecvError, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pvw_core::{defaults, EventBus};

use crate::AppState;

/// Heartbeat settings.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Expected interval between client heartbeats.
    pub heartbeat_interval: Duration,
    /// Connections silent for `heartbeat_interval * timeout_factor` are dropped.
    pub timeout_factor: u32,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(defaults::WS_HEARTBEAT_INTERVAL_SECS),
            timeout_factor: defaults::WS_HEARTBEAT_TIMEOUT_FACTOR,
        }
    }
}

impl WsConfig {
    /// Read `WS_HEARTBEAT_INTERVAL_SECS` and `WS_HEARTBEAT_TIMEOUT_FACTOR`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let heartbeat_interval = std::env::var("WS_HEARTBEAT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.heartbeat_interval);
        let timeout_factor = std::env::var("WS_HEARTBEAT_TIMEOUT_FACTOR")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.timeout_factor);
        Self {
            heartbeat_interval,
            timeout_factor,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_timeout_factor(mut self, factor: u32) -> Self {
        self.timeout_factor = factor.max(1);
        self
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.timeout_factor
    }
}

/// Message sent by a client.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Heartbeat,
}

/// Message sent to a client.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Connected {
        connection_id: Uuid,
    },
    Broadcast {
        topic: String,
        data: JsonValue,
        timestamp: DateTime<Utc>,
    },
    Subscribed {
        topic: String,
    },
    Unsubscribed {
        topic: String,
    },
    HeartbeatAck {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

struct Connection {
    tx: mpsc::UnboundedSender<OutboundMessage>,
    topics: HashSet<String>,
    last_heartbeat: Instant,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<Uuid, Connection>,
    topic_subscribers: HashMap<String, HashSet<Uuid>>,
}

impl Registry {
    fn remove(&mut self, connection_id: Uuid) -> bool {
        let Some(conn) = self.connections.remove(&connection_id) else {
            return false;
        };
        for topic in conn.topics {
            if let Some(subscribers) = self.topic_subscribers.get_mut(&topic) {
                subscribers.remove(&connection_id);
                if subscribers.is_empty() {
                    self.topic_subscribers.remove(&topic);
                }
            }
        }
        true
    }
}

/// Connection and topic counts.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WsStats {
    pub connections: usize,
    pub topics: HashMap<String, usize>,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

/// Tracks connected clients and their topic subscriptions.
pub struct WebSocketManager {
    config: WsConfig,
    registry: RwLock<Registry>,
}

impl WebSocketManager {
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Register a connection; the receiver yields messages for the client.
    pub async fn connect(&self) -> (Uuid, mpsc::UnboundedReceiver<OutboundMessage>) {
        let connection_id = Uuid::now_v7();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(OutboundMessage::Connected { connection_id });

        let mut registry = self.registry.write().await;
        registry.connections.insert(
            connection_id,
            Connection {
                tx,
                topics: HashSet::new(),
                last_heartbeat: Instant::now(),
            },
        );
        info!(
            subsystem = "api",
            component = "websocket",
            %connection_id,
            active = registry.connections.len(),
            "WebSocket connection opened"
        );
        (connection_id, rx)
    }

    /// Remove a connection and all of its subscriptions.
    pub async fn disconnect(&self, connection_id: Uuid) {
        let mut registry = self.registry.write().await;
        if registry.remove(connection_id) {
            info!(
                subsystem = "api",
                component = "websocket",
                %connection_id,
                active = registry.connections.len(),
                "WebSocket connection closed"
            );
        }
    }

    /// Subscribe to `topic`. Returns `false` for an unknown connection.
    pub async fn subscribe(&self, connection_id: Uuid, topic: &str) -> bool {
        let mut registry = self.registry.write().await;
        let Some(conn) = registry.connections.get_mut(&connection_id) else {
            return false;
        };
        conn.topics.insert(topic.to_string());
        registry
            .topic_subscribers
            .entry(topic.to_string())
            .or_default()
            .insert(connection_id);
        debug!(%connection_id, topic, "Subscribed");
        true
    }

    /// Unsubscribe from `topic`. Returns `false` for an unknown connection.
    pub async fn unsubscribe(&self, connection_id: Uuid, topic: &str) -> bool {
        let mut registry = self.registry.write().await;
        let Some(conn) = registry.connections.get_mut(&connection_id) else {
            return false;
        };
        conn.topics.remove(topic);
        if let Some(subscribers) = registry.topic_subscribers.get_mut(topic) {
            subscribers.remove(&connection_id);
            if subscribers.is_empty() {
                registry.topic_subscribers.remove(topic);
            }
        }
        debug!(%connection_id, topic, "Unsubscribed");
        true
    }

    /// Record a heartbeat.
    pub async fn heartbeat(&self, connection_id: Uuid) -> bool {
        let mut registry = self.registry.write().await;
        match registry.connections.get_mut(&connection_id) {
            Some(conn) => {
                conn.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Send a message to one connection; a dead connection is removed.
    pub async fn send_to(&self, connection_id: Uuid, message: OutboundMessage) -> bool {
        let failed = {
            let registry = self.registry.read().await;
            match registry.connections.get(&connection_id) {
                Some(conn) => conn.tx.send(message).is_err(),
                None => return false,
            }
        };
        if failed {
            self.disconnect(connection_id).await;
        }
        !failed
    }

    /// Send `data` to every subscriber of `topic`. Returns how many
    /// connections it was delivered to.
    pub async fn broadcast(&self, topic: &str, data: JsonValue) -> usize {
        let message = OutboundMessage::Broadcast {
            topic: topic.to_string(),
            data,
            timestamp: Utc::now(),
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let registry = self.registry.read().await;
            let Some(subscribers) = registry.topic_subscribers.get(topic) else {
                return 0;
            };
            for id in subscribers {
                match registry.connections.get(id) {
                    Some(conn) if conn.tx.send(message.clone()).is_ok() => delivered += 1,
                    _ => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() {
            let mut registry = self.registry.write().await;
            for id in dead {
                registry.remove(id);
                debug!(connection_id = %id, topic, "Dropped dead WebSocket connection");
            }
        }
        delivered
    }

    /// Drop connections whose last heartbeat is older than the timeout as of
    /// `now`. Returns the removed ids.
    pub async fn sweep_stale(&self, now: Instant) -> Vec<Uuid> {
        let timeout = self.config.heartbeat_timeout();
        let mut registry = self.registry.write().await;
        let stale: Vec<Uuid> = registry
            .connections
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_heartbeat) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            registry.remove(*id);
        }
        if !stale.is_empty() {
            info!(
                subsystem = "api",
                component = "websocket",
                removed = stale.len(),
                active = registry.connections.len(),
                "Removed stale WebSocket connections"
            );
        }
        stale
    }

    /// Drop every connection; their sockets close once the senders are gone.
    pub async fn close_all(&self) {
        let mut registry = self.registry.write().await;
        let count = registry.connections.len();
        registry.connections.clear();
        registry.topic_subscribers.clear();
        if count > 0 {
            info!(closed = count, "Closed all WebSocket connections");
        }
    }

    pub async fn stats(&self) -> WsStats {
        let registry = self.registry.read().await;
        WsStats {
            connections: registry.connections.len(),
            topics: registry
                .topic_subscribers
                .iter()
                .map(|(topic, subs)| (topic.clone(), subs.len()))
                .collect(),
            heartbeat_interval_secs: self.config.heartbeat_interval.as_secs(),
            heartbeat_timeout_secs: self.config.heartbeat_timeout().as_secs(),
        }
    }

    /// Apply one client message and reply to it. Returns the reply, which
    /// is an error when the connection is no longer registered.
    pub async fn handle_client_text(&self, connection_id: Uuid, text: &str) -> OutboundMessage {
        let unknown = || OutboundMessage::Error {
            message: format!("Connection {} is no longer active", connection_id),
        };
        let reply = match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { topic }) if topic.trim().is_empty() => {
                OutboundMessage::Error {
                    message: "Topic must not be empty".to_string(),
                }
            }
            Ok(ClientMessage::Subscribe { topic }) => {
                if self.subscribe(connection_id, &topic).await {
                    OutboundMessage::Subscribed { topic }
                } else {
                    unknown()
                }
            }
            Ok(ClientMessage::Unsubscribe { topic }) => {
                if self.unsubscribe(connection_id, &topic).await {
                    OutboundMessage::Unsubscribed { topic }
                } else {
                    unknown()
                }
            }
            Ok(ClientMessage::Heartbeat) => {
                if self.heartbeat(connection_id).await {
                    OutboundMessage::HeartbeatAck {
                        timestamp: Utc::now(),
                    }
                } else {
                    unknown()
                }
            }
            Err(e) => OutboundMessage::Error {
                message: format!("Invalid message: {}", e),
            },
        };
        self.send_to(connection_id, reply.clone()).await;
        reply
    }

    /// Forward every event on the bus to the topics it belongs to.
    pub fn spawn_fanout(self: &Arc<Self>, event_bus: &EventBus) -> JoinHandle<()> {
        let manager = self.clone();
        let mut rx = event_bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        let data = match serde_json::to_value(&envelope) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize event envelope");
                                continue;
                            }
                        };
                        for topic in envelope.payload.topics() {
                            manager.broadcast(&topic, data.clone()).await;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WebSocket fan-out lagged, missed events");
                    }
                    Err(RecvError::Closed) => {
                        info!("Event bus closed, WebSocket fan-out stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Periodically drop connections that stopped sending heartbeats.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.heartbeat_interval);
            loop {
                interval.tick().await;
                manager.sweep_stale(Instant::now()).await;
            }
        })
    }
}

/// `GET /api/v1/ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let manager = state.ws.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, manager))
}

async fn handle_socket(socket: WebSocket, manager: Arc<WebSocketManager>) {
    use futures::{SinkExt, StreamExt};

    let (connection_id, mut outbound) = manager.connect().await;
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize WebSocket message");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        // Sender dropped by the manager (stale or shutdown): close the socket.
        let _ = sender.send(Message::Close(None)).await;
    });

    let recv_manager = manager.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    recv_manager.handle_client_text(connection_id, &text).await;
                }
                Message::Pong(_) | Message::Ping(_) => {
                    recv_manager.heartbeat(connection_id).await;
                }
                Message::Close(_) => break,
                Message::Binary(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    manager.disconnect(connection_id).await;
}
