//! Component D — market-data stream.
//!
//! Decodes exchange market/user events carried over a `WsTransport`
//! subscription and fans them out to bounded, typed channels per event
//! kind — the callback-to-channel translation `scrapers/polymarket_ws.rs`
//! does inline (`handle_text_message`) and `scrapers/polymarket_book_store.rs`'s
//! `SubscriptionManager::handle_message` does per-book, generalized to the
//! full §4.D event table.

use crate::decimal::Price;
use crate::model::{PriceLevel, Side};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceChangeEvent {
    pub asset_id: String,
    pub price: Price,
    pub old_price: Option<Price>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BookEvent {
    pub asset_id: String,
    pub market: String,
    pub hash: Option<String>,
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: i64,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LastTradePriceEvent {
    pub id: String,
    pub market: String,
    pub asset_id: String,
    pub side: Side,
    pub price: Price,
    pub size: Price,
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: i64,
    pub tx_hash: Option<String>,
    pub fee_rate_bps: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderEvent {
    pub id: String,
    pub status: String,
    pub asset_id: String,
    pub side: Side,
    pub price: Price,
    pub size: Price,
    pub size_filled: Price,
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserTradeEvent {
    pub id: String,
    pub order_id: String,
    pub market: String,
    pub asset_id: String,
    pub side: Side,
    pub price: Price,
    pub size: Price,
    pub maker: bool,
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub enum MarketEvent {
    PriceChange(PriceChangeEvent),
    Book(BookEvent),
    LastTradePrice(LastTradePriceEvent),
    Order(OrderEvent),
    UserTrade(UserTradeEvent),
}

/// Timestamps may arrive as either a JSON string or an integer; this
/// deserializer accepts both, mirroring the wire quirk the source
/// scraper works around for `last_trade_price`.
fn de_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrInt {
        Str(String),
        Int(i64),
    }
    match StrOrInt::deserialize(deserializer)? {
        StrOrInt::Int(i) => Ok(i),
        StrOrInt::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Per-event-kind bounded channels a `Streamer` publishes decoded events
/// into. Each field mirrors one row of §4.D's event_type table.
pub struct StreamerChannels {
    pub price_change: mpsc::Sender<PriceChangeEvent>,
    pub book: mpsc::Sender<BookEvent>,
    pub last_trade_price: mpsc::Sender<LastTradePriceEvent>,
    pub order: mpsc::Sender<OrderEvent>,
    pub user_trade: mpsc::Sender<UserTradeEvent>,
}

pub struct Streamer {
    channels: StreamerChannels,
}

impl Streamer {
    pub fn new(channels: StreamerChannels) -> Self {
        Self { channels }
    }

    /// If the payload starts with `[`, decode as a JSON array and
    /// dispatch each element; otherwise dispatch as one (§4.D).
    pub async fn decode_and_dispatch(&self, bytes: &[u8]) {
        let trimmed = trim_leading_ws(bytes);
        if trimmed.first() == Some(&b'[') {
            match serde_json::from_slice::<Vec<Value>>(bytes) {
                Ok(values) => {
                    for v in values {
                        self.dispatch_one(v).await;
                    }
                }
                Err(e) => debug!(error = %e, "failed to decode market event array"),
            }
        } else {
            match serde_json::from_slice::<Value>(bytes) {
                Ok(v) => self.dispatch_one(v).await,
                Err(e) => debug!(error = %e, "failed to decode market event"),
            }
        }
    }

    async fn dispatch_one(&self, value: Value) {
        let event_type = value.get("event_type").and_then(|v| v.as_str()).unwrap_or("");
        match event_type {
            "price_change" => {
                if let Ok(ev) = serde_json::from_value::<PriceChangeEvent>(value) {
                    let _ = self.channels.price_change.try_send(ev);
                }
            }
            "book" => {
                if let Ok(ev) = serde_json::from_value::<BookEvent>(value) {
                    let _ = self.channels.book.try_send(ev);
                }
            }
            "last_trade_price" => {
                if let Ok(ev) = serde_json::from_value::<LastTradePriceEvent>(value) {
                    let _ = self.channels.last_trade_price.try_send(ev);
                }
            }
            "order" => {
                if let Ok(ev) = serde_json::from_value::<OrderEvent>(value) {
                    let _ = self.channels.order.try_send(ev);
                }
            }
            "user_trade" => {
                if let Ok(ev) = serde_json::from_value::<UserTradeEvent>(value) {
                    let _ = self.channels.user_trade.try_send(ev);
                }
            }
            other => debug!(event_type = other, "unrecognized market event type"),
        }
    }
}

fn trim_leading_ws(bytes: &[u8]) -> &[u8] {
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    &bytes[i..]
}

/// Internal state tracking current subscriptions, for replay on
/// reconnect (§4.D: "Internal state tracks current subscriptions so
/// reconnect can replay them").
#[derive(Debug, Clone, Default)]
pub struct SubscriptionState {
    pub market_assets: Vec<String>,
    pub market_markets: Vec<String>,
    pub user_auth: Option<UserAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAuth {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl SubscriptionState {
    pub fn market_subscribe_message(&self) -> String {
        serde_json::json!({
            "type": "subscribe",
            "channel": "market",
            "assets_ids": self.market_assets,
            "markets": self.market_markets,
        })
        .to_string()
    }

    pub fn user_subscribe_message(&self) -> Option<String> {
        self.user_auth.as_ref().map(|auth| {
            serde_json::json!({
                "type": "subscribe",
                "channel": "user",
                "auth": {
                    "api_key": auth.api_key,
                    "secret": auth.secret,
                    "passphrase": auth.passphrase,
                }
            })
            .to_string()
        })
    }
}

pub type DecodedBooks = HashMap<String, BookEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatches_book_event_by_event_type() {
        let (book_tx, mut book_rx) = mpsc::channel(8);
        let (pc_tx, _pc_rx) = mpsc::channel(8);
        let (ltp_tx, _ltp_rx) = mpsc::channel(8);
        let (order_tx, _order_rx) = mpsc::channel(8);
        let (ut_tx, _ut_rx) = mpsc::channel(8);
        let streamer = Streamer::new(StreamerChannels {
            price_change: pc_tx,
            book: book_tx,
            last_trade_price: ltp_tx,
            order: order_tx,
            user_trade: ut_tx,
        });

        let payload = serde_json::json!({
            "event_type": "book",
            "asset_id": "a1",
            "market": "m1",
            "hash": "abc",
            "timestamp": "1700000000",
            "bids": [],
            "asks": [],
        })
        .to_string();

        streamer.decode_and_dispatch(payload.as_bytes()).await;
        let ev = book_rx.recv().await.unwrap();
        assert_eq!(ev.asset_id, "a1");
        assert_eq!(ev.timestamp, 1700000000);
    }

    #[test]
    fn market_subscribe_message_shape() {
        let state = SubscriptionState {
            market_assets: vec!["a1".into()],
            market_markets: vec![],
            user_auth: None,
        };
        let msg = state.market_subscribe_message();
        assert!(msg.contains("\"channel\":\"market\""));
    }
}
