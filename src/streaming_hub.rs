//! Component K — streaming hub.
//!
//! Grounded on `main.rs`'s `websocket_broadcaster`/`handle_socket` pair:
//! a `broadcast::Receiver` fan-out loop feeding a per-client axum `ws`
//! upgrade handler that replays recent state on connect, then forwards
//! new events via `tokio::select!` alongside a client-ping/pong handler.

use crate::orchestrator::OrchestratorEvent;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Shared hub state: holds the sender side so new axum connections can
/// each grab their own `Receiver` (§5 "Across assets/accounts, no
/// ordering is guaranteed; callbacks may interleave" — each client reads
/// the broadcast independently).
#[derive(Clone)]
pub struct StreamingHub {
    events: broadcast::Sender<OrchestratorEvent>,
}

impl StreamingHub {
    pub fn new(events: broadcast::Sender<OrchestratorEvent>) -> Self {
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<StreamingHub>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<StreamingHub>) {
    let mut rx = hub.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let msg = serde_json::to_string(&event)
                            .unwrap_or_else(|e| {
                                warn!("failed to serialize ws event: {}", e);
                                "{}".to_string()
                            });
                        if socket.send(Message::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "client lagged behind event stream");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" {
                            let _ = socket.send(Message::Text("pong".to_string())).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_each_get_independent_receivers() {
        let (tx, _rx) = broadcast::channel(16);
        let hub = StreamingHub::new(tx.clone());
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        tx.send(OrchestratorEvent::MonitorTick {
            open_positions: 1,
            unrealized_pnl: 5.0,
        })
        .unwrap();

        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }
}
