// =============================================================================
// Market-data client — resilient OKX v5 WebSocket session
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::orderbook::OrderBookStore;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle of a [`MarketDataClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Narrow contract the subscription controller depends on, decoupling it
/// from the concrete WebSocket client.
#[async_trait]
pub trait SubscriptionClient: Send + Sync {
    async fn subscribe(&self, targets: Vec<String>) -> Result<()>;
    async fn unsubscribe(&self, targets: Vec<String>) -> Result<()>;
    async fn get_subscribed(&self) -> HashSet<String>;
}

#[derive(serde::Serialize)]
struct SubArg<'a> {
    channel: &'a str,
    #[serde(rename = "instId")]
    inst_id: &'a str,
}

#[derive(serde::Serialize)]
struct OpFrame<'a> {
    op: &'a str,
    args: Vec<SubArg<'a>>,
}

/// One resilient session against an OKX-style public WebSocket endpoint.
///
/// Owns no business logic: every received frame is handed verbatim to the
/// order book store; reconnection resubscribes whatever was tracked before
/// the drop.
pub struct MarketDataClient {
    url: String,
    channels: Vec<&'static str>,
    config: Config,
    store: Arc<OrderBookStore>,
    state: RwLock<ConnectionState>,
    subscribed: RwLock<HashSet<String>>,
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    shutting_down: AtomicBool,
    reconnect_attempts: AtomicU32,
}

impl MarketDataClient {
    pub fn new(
        url: String,
        channels: Vec<&'static str>,
        config: Config,
        store: Arc<OrderBookStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            url,
            channels,
            config,
            store,
            state: RwLock::new(ConnectionState::Disconnected),
            subscribed: RwLock::new(HashSet::new()),
            outbound: RwLock::new(None),
            shutting_down: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Drive the connect/read/ping/reconnect loop until shutdown or the
    /// reconnect budget is exhausted. Intended to be spawned once as a
    /// long-lived task; `shutdown` is the cancellation signal broadcast
    /// from `main`.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            if self.shutting_down.load(Ordering::Relaxed) {
                return;
            }

            *self.state.write() = ConnectionState::Connecting;
            let dial_result = tokio::select! {
                result = self.dial() => result,
                _ = shutdown.recv() => {
                    self.begin_shutdown();
                    return;
                }
            };

            match dial_result {
                Ok(stream) => {
                    self.reconnect_attempts.store(0, Ordering::Relaxed);
                    *self.state.write() = ConnectionState::Connected;
                    tokio::select! {
                        _ = self.serve(stream) => {}
                        _ = shutdown.recv() => {
                            self.begin_shutdown();
                            return;
                        }
                    }
                    *self.state.write() = ConnectionState::Disconnected;
                }
                Err(e) => {
                    warn!(error = %e, url = %self.url, "dial failed");
                    *self.state.write() = ConnectionState::Disconnected;
                }
            }

            if self.shutting_down.load(Ordering::Relaxed) {
                return;
            }

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if attempt > self.config.reconnect_max_attempts {
                error!(url = %self.url, "reconnect attempts exhausted, giving up");
                return;
            }
            let backoff = Duration::from_secs(self.config.reconnect_backoff_secs * attempt as u64);
            info!(attempt, backoff_secs = backoff.as_secs(), "reconnecting after backoff");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.recv() => {
                    self.begin_shutdown();
                    return;
                }
            }
        }
    }

    /// Transition into `Disconnecting` and flag the run loop to stop
    /// reconnecting, in response to a cancellation signal or an explicit
    /// caller-driven shutdown.
    fn begin_shutdown(&self) {
        *self.state.write() = ConnectionState::Disconnecting;
        self.shutdown();
        *self.state.write() = ConnectionState::Disconnected;
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    async fn dial(&self) -> Result<WsStream> {
        let connect_fut = async {
            if let Some(proxy) = &self.config.socks5_proxy {
                self.dial_via_socks5(proxy).await
            } else {
                let (stream, _resp) = connect_async(&self.url)
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
                Ok(stream)
            }
        };

        tokio::time::timeout(self.config.dial_timeout(), connect_fut)
            .await
            .map_err(|_| Error::Transport("dial timed out".into()))?
    }

    async fn dial_via_socks5(&self, proxy: &str) -> Result<WsStream> {
        let url = url::Url::parse(&self.url).map_err(|e| Error::Transport(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Transport("missing host in ws url".into()))?;
        let port = url.port_or_known_default().unwrap_or(443);

        let tcp = tokio_socks::tcp::Socks5Stream::connect(proxy, (host, port))
            .await
            .map_err(|e| Error::Transport(format!("socks5 connect failed: {e}")))?
            .into_inner();

        let (stream, _resp) = tokio_tungstenite::client_async_tls(&self.url, tcp)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(stream)
    }

    async fn resubscribe_all(&self) {
        let targets: Vec<String> = self.subscribed.read().iter().cloned().collect();
        if targets.is_empty() {
            return;
        }
        if let Err(e) = self.send_op("subscribe", &targets).await {
            warn!(error = %e, "resubscribe failed");
        }
    }

    /// Runs the read loop and ping loop concurrently until either ends,
    /// meaning the connection dropped.
    async fn serve(&self, stream: WsStream) {
        let (mut sink, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.write() = Some(tx);
        self.resubscribe_all().await;

        let write_task = async {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        };

        let ping_interval = self.config.ping_interval();
        let ping_task = async {
            let mut ticker = tokio::time::interval(ping_interval);
            loop {
                ticker.tick().await;
                if let Some(tx) = self.outbound.read().clone() {
                    if tx.send(Message::Ping(Vec::new())).is_err() {
                        break;
                    }
                } else {
                    break;
                }
            }
        };

        let read_task = async {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = self.store.process_message(text.as_bytes()) {
                            warn!(error = %e, "failed to process market data frame");
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("exchange closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "read error");
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = write_task => {}
            _ = ping_task => {}
            _ = read_task => {}
        }

        *self.outbound.write() = None;
    }

    async fn send_op(&self, op: &'static str, instrument_ids: &[String]) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(Error::State("client not connected".into()));
        }
        let sender = self
            .outbound
            .read()
            .clone()
            .ok_or_else(|| Error::State("no active connection".into()))?;

        let mut args = Vec::with_capacity(instrument_ids.len() * self.channels.len());
        for inst_id in instrument_ids {
            for channel in &self.channels {
                args.push(SubArg {
                    channel,
                    inst_id,
                });
            }
        }
        let frame = OpFrame { op, args };
        let json = serde_json::to_string(&frame)?;
        sender
            .send(Message::Text(json))
            .map_err(|_| Error::Transport("outbound channel closed".into()))?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionClient for MarketDataClient {
    async fn subscribe(&self, targets: Vec<String>) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        self.send_op("subscribe", &targets).await?;
        let mut guard = self.subscribed.write();
        for t in targets {
            guard.insert(t);
        }
        Ok(())
    }

    async fn unsubscribe(&self, targets: Vec<String>) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        self.send_op("unsubscribe", &targets).await?;
        let mut guard = self.subscribed.write();
        for t in &targets {
            guard.remove(t);
        }
        Ok(())
    }

    async fn get_subscribed(&self) -> HashSet<String> {
        self.subscribed.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_disconnected() {
        let config = Config::default();
        let store = Arc::new(OrderBookStore::new());
        let client = MarketDataClient::new(
            "wss://example.invalid".into(),
            vec!["books", "tickers"],
            config,
            store,
        );
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_fails() {
        let config = Config::default();
        let store = Arc::new(OrderBookStore::new());
        let client = MarketDataClient::new(
            "wss://example.invalid".into(),
            vec!["books"],
            config,
            store,
        );
        let err = client.subscribe(vec!["BTC-USDT-SWAP".into()]).await.unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }
}
