// =============================================================================
// Broadcast hub — fan-out of analytics updates to browser WebSocket clients
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::StreamExt as _;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

const CLIENT_QUEUE_CAPACITY: usize = 256;
const APP_PING_INTERVAL: Duration = Duration::from_secs(30);
const WS_PING_INTERVAL: Duration = Duration::from_secs(54);
const READ_DEADLINE: Duration = Duration::from_secs(60);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

impl OutboundFrame {
    fn analysis_update(instrument_id: &str, data: serde_json::Value) -> Self {
        Self {
            kind: "analysis_update",
            instrument_id: Some(instrument_id.to_string()),
            data: Some(data),
            error: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn ping() -> Self {
        Self {
            kind: "ping",
            instrument_id: None,
            data: None,
            error: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

struct Client {
    subscriptions: Mutex<HashSet<String>>,
    sender: mpsc::Sender<Message>,
}

/// Registry of connected browser clients plus the fan-out/heartbeat loop.
///
/// Back-pressure policy: a client whose outbound queue is full simply
/// misses the frame — the hub never blocks on a slow reader.
pub struct Hub {
    clients: RwLock<HashMap<Uuid, Arc<Client>>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
        })
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Handle one upgraded browser WebSocket connection until it closes.
    pub async fn handle_connection(self: Arc<Self>, socket: WebSocket) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let client = Arc::new(Client {
            subscriptions: Mutex::new(HashSet::new()),
            sender: tx,
        });
        self.clients.write().insert(id, client.clone());
        info!(client_id = %id, total = self.client_count(), "browser client connected");

        let (sink, stream) = socket.split();
        let write_handle = tokio::spawn(Self::write_loop(sink, rx));
        Self::read_loop(stream, client).await;

        write_handle.abort();
        self.clients.write().remove(&id);
        info!(client_id = %id, total = self.client_count(), "browser client disconnected");
    }

    async fn write_loop(
        mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
        mut rx: mpsc::Receiver<Message>,
    ) {
        use futures_util::SinkExt;
        let mut ws_ping = tokio::time::interval(WS_PING_INTERVAL);
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(msg) => {
                            if tokio::time::timeout(WRITE_DEADLINE, sink.send(msg)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
                _ = ws_ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn read_loop(
        mut stream: futures_util::stream::SplitStream<WebSocket>,
        client: Arc<Client>,
    ) {
        use futures_util::StreamExt;
        loop {
            let next = tokio::time::timeout(READ_DEADLINE, stream.next()).await;
            let msg = match next {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "browser client read error");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("browser client read deadline exceeded");
                    break;
                }
            };

            match msg {
                Message::Text(text) => Self::handle_client_message(&client, &text),
                Message::Pong(_) => {}
                Message::Close(_) => break,
                _ => {}
            }
        }
    }

    fn handle_client_message(client: &Client, text: &str) {
        #[derive(serde::Deserialize)]
        struct Incoming {
            #[serde(rename = "type")]
            kind: String,
            instrument_id: Option<String>,
        }
        let parsed: Incoming = match serde_json::from_str(text) {
            Ok(p) => p,
            Err(_) => return,
        };
        match parsed.kind.as_str() {
            "subscribe" => {
                if let Some(id) = parsed.instrument_id {
                    client.subscriptions.lock().insert(id);
                }
            }
            "unsubscribe" => {
                if let Some(id) = parsed.instrument_id {
                    client.subscriptions.lock().remove(&id);
                }
            }
            "pong" => {}
            _ => {}
        }
    }

    /// Non-blocking fan-out to every client subscribed to `instrument_id`.
    /// A full queue drops the frame for that client only.
    pub fn broadcast_analysis_update(&self, instrument_id: &str, data: serde_json::Value) {
        let frame = OutboundFrame::analysis_update(instrument_id, data);
        let Ok(encoded) = serde_json::to_string(&frame) else {
            return;
        };
        for client in self.clients.read().values() {
            if !client.subscriptions.lock().contains(instrument_id) {
                continue;
            }
            if client.sender.try_send(Message::Text(encoded.clone())).is_err() {
                warn!(instrument_id, "client queue full, dropping frame");
            }
        }
    }

    /// Run the 30s application-level heartbeat loop until `shutdown` fires.
    pub async fn run_heartbeat(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(APP_PING_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = OutboundFrame::ping();
                    let Ok(encoded) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    for client in self.clients.read().values() {
                        let _ = client.sender.try_send(Message::Text(encoded.clone()));
                    }
                }
                _ = shutdown.recv() => {
                    info!("heartbeat loop shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_frame_serializes_without_null_noise() {
        let frame = OutboundFrame::ping();
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(!json.contains("instrument_id"));
    }

    #[test]
    fn analysis_update_carries_instrument_and_payload() {
        let frame = OutboundFrame::analysis_update("BTC-USDT-SWAP", serde_json::json!({"a": 1}));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("BTC-USDT-SWAP"));
        assert!(json.contains("analysis_update"));
    }

    #[test]
    fn new_hub_has_no_clients() {
        let hub = Hub::new();
        assert_eq!(hub.client_count(), 0);
    }
}
