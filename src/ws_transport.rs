//! Component C — resilient WebSocket transport.
//!
//! Generalizes `scrapers/polymarket_ws.rs`'s one-off reconnect loop (fixed
//! to the Polymarket market channel) into a reusable client with the state
//! machine and subscription-replay policy of §4.C. Per §4.C, the read,
//! write, and heartbeat loops are three independent `tokio::spawn`ed
//! tasks — each single-threaded cooperative inside itself, parallel with
//! the other two — sharing one `tokio::sync::Notify` as the cancellation
//! signal (§9 Design Notes: "model the three loops... as independent
//! cooperative tasks sharing a single cancellation token"). All outbound
//! frames, including heartbeat pings and ping replies, funnel through the
//! write task's channel since it alone owns the sink half.
//! The doubling-backoff-capped-at-30s reconnect is carried over directly
//! from `scrapers/polymarket_ws.rs`.

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect_enabled: bool,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// 0 = unlimited.
    pub max_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        // §5 defaults: WebSocket read 60s, write 10s, heartbeat interval
        // 30s with 10s timeout; reconnect backoff [1s, 30s] doubling.
        Self {
            url: String::new(),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            reconnect_enabled: true,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

pub type MessageFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

struct Subscription {
    filter: Option<MessageFilter>,
    subscribe_message: Option<String>,
    tx: mpsc::Sender<Vec<u8>>,
}

/// Every outbound frame — client writes, heartbeat pings, ping replies —
/// funnels through the write task via this request, since only one task
/// may own the sink half at a time.
struct WriteRequest {
    message: Message,
    ack: Option<oneshot::Sender<Result<(), String>>>,
}

/// `min_delay * 2^(attempt-1)` capped at `max_delay` (§4.C reconnect policy).
pub fn backoff_delay(attempt: u32, min_delay: Duration, max_delay: Duration) -> Duration {
    if attempt == 0 {
        return min_delay;
    }
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    let millis = (min_delay.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(millis).min(max_delay)
}

pub struct WsTransport {
    config: TransportConfig,
    state: Arc<RwLock<ConnState>>,
    subscriptions: Arc<RwLock<HashMap<u64, Subscription>>>,
    next_sub_id: AtomicU64,
    write_tx: RwLock<Option<mpsc::Sender<WriteRequest>>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
    shutdown: RwLock<Option<Arc<Notify>>>,
    attempt: AtomicU32,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Arc::new(RwLock::new(ConnState::Disconnected)),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            next_sub_id: AtomicU64::new(1),
            write_tx: RwLock::new(None),
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            shutdown: RwLock::new(None),
            attempt: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> ConnState {
        *self.state.read()
    }

    /// Register a subscription; the subscribe message (if any) is resent
    /// automatically on every successful reconnect.
    pub fn subscribe(
        &self,
        filter: Option<MessageFilter>,
        subscribe_message: Option<String>,
        buffer: usize,
    ) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_sub_id.fetch_add(1, AtomicOrdering::SeqCst);
        self.subscriptions.write().insert(
            id,
            Subscription {
                filter,
                subscribe_message,
                tx,
            },
        );
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscriptions.write().remove(&id);
    }

    /// Drives the connect/read/write/heartbeat/reconnect loops until
    /// `close()` is called. Intended to be `tokio::spawn`ed once.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.closed.load(AtomicOrdering::SeqCst) {
                *self.state.write() = ConnState::Closed;
                return;
            }

            *self.state.write() = ConnState::Connecting;
            match self.clone().connect_and_stream().await {
                Ok(()) => {
                    self.attempt.store(0, AtomicOrdering::SeqCst);
                }
                Err(e) => {
                    warn!(error = %e, url = %self.config.url, "websocket disconnected");
                }
            }

            if self.closed.load(AtomicOrdering::SeqCst) {
                *self.state.write() = ConnState::Closed;
                return;
            }
            if !self.config.reconnect_enabled {
                *self.state.write() = ConnState::Disconnected;
                return;
            }

            let attempt = self.attempt.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            if self.config.max_attempts != 0 && attempt > self.config.max_attempts {
                *self.state.write() = ConnState::Disconnected;
                return;
            }

            *self.state.write() = ConnState::Reconnecting;
            let delay = backoff_delay(attempt, self.config.min_delay, self.config.max_delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Connects, replays subscriptions, then launches the read, write, and
    /// heartbeat loops as three independent tasks sharing `shutdown` as
    /// their cancellation signal (§4.C, §9). Each loop is single-threaded
    /// cooperative inside itself and runs in parallel with the other two;
    /// any one of them observing an error notifies `shutdown` so the
    /// others wind down too, and `connect_and_stream` returns once all
    /// three have exited, surfacing whichever error occurred first.
    async fn connect_and_stream(self: Arc<Self>) -> anyhow::Result<()> {
        info!(url = %self.config.url, "connecting websocket");
        let (ws_stream, _resp) = connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();
        *self.state.write() = ConnState::Connected;
        info!(url = %self.config.url, "websocket connected");

        // Replay all subscriptions with a non-nil subscribe message.
        for sub in self.subscriptions.read().values() {
            if let Some(msg) = &sub.subscribe_message {
                write.send(Message::Text(msg.clone())).await?;
            }
        }

        let (write_tx, mut write_rx) = mpsc::channel::<WriteRequest>(256);
        *self.write_tx.write() = Some(write_tx.clone());

        let shutdown = Arc::new(Notify::new());
        *self.shutdown.write() = Some(shutdown.clone());
        if self.closed.load(AtomicOrdering::SeqCst) {
            shutdown.notify_waiters();
        }

        let write_task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => return Ok(()),
                        req = write_rx.recv() => {
                            let Some(req) = req else { return Ok(()) };
                            let outcome = write.send(req.message).await.map_err(|e| e.to_string());
                            if let Some(ack) = req.ack {
                                let _ = ack.send(outcome.clone());
                            }
                            if let Err(e) = outcome {
                                shutdown.notify_waiters();
                                return Err(anyhow::anyhow!("write failed: {e}"));
                            }
                        }
                    }
                }
            })
        };

        let read_task = {
            let this = self.clone();
            let write_tx = write_tx.clone();
            let shutdown = shutdown.clone();
            let read_timeout = self.config.read_timeout;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => return Ok(()),
                        frame = tokio::time::timeout(read_timeout, read.next()) => {
                            let frame = match frame {
                                Ok(f) => f,
                                Err(_) => {
                                    shutdown.notify_waiters();
                                    return Err(anyhow::anyhow!("read timeout"));
                                }
                            };
                            let Some(frame) = frame else {
                                shutdown.notify_waiters();
                                return Err(anyhow::anyhow!("stream ended"));
                            };
                            match frame {
                                Ok(Message::Text(text)) => this.route_message(text.as_bytes()),
                                Ok(Message::Binary(bytes)) => this.route_message(&bytes),
                                Ok(Message::Ping(payload)) => {
                                    let _ = write_tx.try_send(WriteRequest {
                                        message: Message::Pong(payload),
                                        ack: None,
                                    });
                                }
                                Ok(Message::Close(frame)) => {
                                    debug!(?frame, "websocket close frame");
                                    shutdown.notify_waiters();
                                    return Ok(());
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    shutdown.notify_waiters();
                                    return Err(anyhow::anyhow!("websocket error: {e}"));
                                }
                            }
                        }
                    }
                }
            })
        };

        let heartbeat_task = {
            let write_tx = write_tx.clone();
            let shutdown = shutdown.clone();
            let heartbeat_interval = self.config.heartbeat_interval;
            let heartbeat_timeout = self.config.heartbeat_timeout;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(heartbeat_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => return Ok(()),
                        _ = ticker.tick() => {
                            let (ack_tx, ack_rx) = oneshot::channel();
                            let sent = write_tx.send(WriteRequest {
                                message: Message::Ping(Vec::new()),
                                ack: Some(ack_tx),
                            }).await;
                            if sent.is_err() {
                                shutdown.notify_waiters();
                                return Err(anyhow::anyhow!("write channel closed"));
                            }
                            match tokio::time::timeout(heartbeat_timeout, ack_rx).await {
                                Ok(Ok(Ok(()))) => {}
                                _ => {
                                    warn!("heartbeat ping timed out");
                                    shutdown.notify_waiters();
                                    return Err(anyhow::anyhow!("heartbeat timeout"));
                                }
                            }
                        }
                    }
                }
            })
        };

        let (read_result, write_result, heartbeat_result) =
            tokio::join!(read_task, write_task, heartbeat_task);
        let read_result =
            read_result.map_err(|e| anyhow::anyhow!("read task panicked: {e}"))?;
        let write_result =
            write_result.map_err(|e| anyhow::anyhow!("write task panicked: {e}"))?;
        let heartbeat_result =
            heartbeat_result.map_err(|e| anyhow::anyhow!("heartbeat task panicked: {e}"))?;

        read_result.and(write_result).and(heartbeat_result)
    }

    /// Walks subscriptions under a read lock; enqueues on filter match,
    /// drops silently if the channel is full (never blocks the read
    /// loop, per §4.C back-pressure policy).
    fn route_message(&self, bytes: &[u8]) {
        for sub in self.subscriptions.read().values() {
            let passes = sub.filter.as_ref().map(|f| f(bytes)).unwrap_or(true);
            if passes {
                let _ = sub.tx.try_send(bytes.to_vec());
            }
        }
    }

    pub async fn send_text(&self, text: String) -> anyhow::Result<()> {
        let tx = self.write_tx.read().clone();
        let Some(tx) = tx else {
            return Err(anyhow::anyhow!("not connected"));
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(WriteRequest {
            message: Message::Text(text),
            ack: Some(ack_tx),
        })
        .await
        .map_err(|_| anyhow::anyhow!("write channel closed"))?;
        tokio::time::timeout(self.config.write_timeout, ack_rx)
            .await
            .map_err(|_| anyhow::anyhow!("write timeout"))?
            .map_err(|_| anyhow::anyhow!("write ack dropped"))?
            .map_err(|e| anyhow::anyhow!(e))
    }

    /// Idempotent; flips state to `Closed` and wakes the read/write/
    /// heartbeat tasks of the current connection (if any) via the shared
    /// cancellation signal so they exit promptly instead of waiting on
    /// their next I/O timeout.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
        *self.state.write() = ConnState::Closed;
        if let Some(shutdown) = self.shutdown.read().as_ref() {
            shutdown.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_monotone_and_bounded() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let mut prev = Duration::from_secs(0);
        for attempt in 1..=10 {
            let d = backoff_delay(attempt, min, max);
            assert!(d >= prev);
            assert!(d <= max);
            prev = d;
        }
        assert_eq!(backoff_delay(10, min, max), max);
    }

    #[test]
    fn close_is_idempotent() {
        let t = WsTransport::new(TransportConfig::default());
        t.close();
        t.close();
        assert_eq!(t.state(), ConnState::Closed);
    }
}
