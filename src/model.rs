//! Core data model (§3). Monetary/price fields are `Decimal`; timestamps
//! are `DateTime<Utc>`; ids are owned `String`s the way the source system's
//! `scrapers`/`vault` modules key everything by token id / order id rather
//! than by pointer (§9 design notes: "the open-orders map and positions map
//! are natural arenas keyed by stable ids").

use crate::decimal::{Money, Price};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected
        )
    }

    pub fn is_cancelable(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SlippageModel {
    None,
    Fixed,
    Linear,
    SqrtRoot,
    Orderbook,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionMode {
    Simple,
    Realistic,
}

/// §3 PriceLevel. Invariant: `size >= 0`; a level with `size == 0` is
/// absent from the book (enforced by `OrderBook::update_level`, not here).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    pub price: Price,
    pub size: Money,
    pub order_count: Option<u32>,
}

impl PriceLevel {
    pub fn new(price: Price, size: Money) -> Self {
        Self {
            price,
            size,
            order_count: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub price: Price,
    pub size: Money,
    pub timestamp: DateTime<Utc>,
    pub fee: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub token_id: String,
    pub market: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Price,
    pub size: Money,
    pub filled_size: Money,
    pub avg_fill_price: Price,
    pub status: OrderStatus,
    pub expiration: Option<DateTime<Utc>>,
    pub fills: Vec<Fill>,
}

impl Order {
    pub fn remaining(&self) -> Money {
        self.size - self.filled_size
    }

    pub fn is_buy(&self) -> bool {
        matches!(self.side, Side::Buy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token_id: String,
    pub market: String,
    pub side: Side,
    pub size: Money,
    pub avg_entry: Price,
    pub current_price: Price,
    pub unrealized_pnl: Money,
    pub realized_pnl: Money,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// `(current_price - avg_entry) * size`, sign-adjusted by side (§4.F
    /// statistics: "Unrealized P&L sums each position's ... sign-adjusted
    /// by side").
    pub fn mark_unrealized(&mut self, current_price: Price) {
        self.current_price = current_price;
        let diff = current_price - self.avg_entry;
        self.unrealized_pnl = match self.side {
            Side::Buy => diff * self.size,
            Side::Sell => -diff * self.size,
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: u64,
    pub token_id: String,
    pub side: Side,
    pub price: Price,
    pub size: Money,
    pub fee: Money,
    pub pnl: Money,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub initial_balance: Money,
    pub balance: Money,
    pub positions: std::collections::HashMap<String, Position>,
    pub open_orders: std::collections::HashMap<u64, Order>,
    pub trade_history: Vec<Trade>,
}

impl Account {
    pub fn new(initial_balance: Money) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            positions: std::collections::HashMap::new(),
            open_orders: std::collections::HashMap::new(),
            trade_history: Vec::new(),
        }
    }

    pub fn total_exposure(&self) -> Money {
        self.positions
            .values()
            .map(|p| p.size.abs() * p.avg_entry)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchOutcome {
    Home,
    Draw,
    Away,
}

/// Only the `Soccer1X2` variant of `EventSpec` is specified. Represented as
/// an enum with one arm rather than a dedicated sum-type machinery since
/// nothing else is specified yet (§9: "EventSpec is a sum type (only
/// Soccer1X2 specified here)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventSpec {
    Soccer1X2 {
        league: String,
        home_team: String,
        away_team: String,
        match_date: DateTime<Utc>,
        outcome: MatchOutcome,
        is_yes_side: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub market_id: String,
    pub token_id: String,
    pub slug: String,
    pub question: String,
    pub event: EventSpec,
    pub best_bid: Price,
    pub best_ask: Price,
    pub mid: Price,
    pub closed: bool,
    pub end_date: DateTime<Utc>,
    pub liquidity: Money,
}

impl Contract {
    pub fn match_key(&self) -> Option<String> {
        match &self.event {
            EventSpec::Soccer1X2 {
                league,
                home_team,
                away_team,
                match_date,
                ..
            } => Some(format!(
                "{league}|{}|{home_team}|{away_team}",
                match_date.format("%Y-%m-%d")
            )),
        }
    }
}

/// Group of up to three contracts (Home/Draw/Away) sharing a `match_key`,
/// used for joint 3-way probability normalization. The group owns the
/// contracts; lookups elsewhere use `match_key` only (§9: "Represent
/// groups as owners and contracts as value members").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchGroup {
    pub match_key: String,
    pub home_win: Option<Contract>,
    pub draw: Option<Contract>,
    pub away_win: Option<Contract>,
}

impl MatchGroup {
    pub fn is_complete(&self) -> bool {
        self.home_win.is_some() && self.draw.is_some() && self.away_win.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Prob3 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Prob3 {
    pub fn new(home: f64, draw: f64, away: f64) -> Self {
        Self { home, draw, away }
    }

    /// `normalize(p) = p / (p.home + p.draw + p.away)`; uniform 1/3 if the
    /// sum is zero (§3).
    pub fn normalize(self) -> Prob3 {
        let sum = self.home + self.draw + self.away;
        if sum.abs() < f64::EPSILON {
            return Prob3::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
        }
        Prob3::new(self.home / sum, self.draw / sum, self.away / sum)
    }

    pub fn get(self, outcome: MatchOutcome) -> f64 {
        match outcome {
            MatchOutcome::Home => self.home,
            MatchOutcome::Draw => self.draw,
            MatchOutcome::Away => self.away,
        }
    }

    pub fn sum(self) -> f64 {
        self.home + self.draw + self.away
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EdgeResult {
    pub q: f64,
    pub price_eff: f64,
    pub edge_raw: f64,
    pub edge_bps: f64,
    pub kelly_frac: f64,
    pub kelly_capped: f64,
    pub suggested_size: f64,
    pub is_value_bet: bool,
    pub fee: f64,
    pub slippage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub token_id: String,
    pub market: String,
    pub price: Price,
    pub volume: Money,
    pub bid_price: Option<Price>,
    pub ask_price: Option<Price>,
    pub bid_size: Option<Money>,
    pub ask_size: Option<Money>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prob3_normalize_handles_zero_sum() {
        let p = Prob3::default().normalize();
        assert!((p.sum() - 1.0).abs() < 1e-9);
        assert!((p.home - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn prob3_normalize_sums_to_one() {
        let p = Prob3::new(0.79, 0.14, 0.07).normalize();
        assert!((p.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn order_status_terminal_set() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(OrderStatus::Open.is_cancelable());
        assert!(!OrderStatus::Filled.is_cancelable());
    }
}
