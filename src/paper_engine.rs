//! Component F — paper execution engine.
//!
//! Grounded on `vault/execution.rs::PaperExecutionAdapter` (latency/
//! slippage/reject/partial-fill simulation shape) and
//! `vault/paper_ledger.rs` (volume-weighted avg-price accounting,
//! near-zero-position removal at `1e-9`), rewritten onto the `Order`/
//! `Fill`/`Position`/`Account` types of §3 with the explicit order state
//! machine, Simple/Realistic fill modes, and slippage-model table of
//! §4.F that the source ledger/adapter pair never modeled directly (they
//! simulate a single randomized fill per call, not a resting-order book).

use crate::decimal::Money;
use crate::error::TradingError;
use crate::model::{
    Account, ExecutionMode, Fill, Order, OrderStatus, OrderType, Position, Side, SlippageModel,
    Trade,
};
use crate::orderbook::OrderBook;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct FeeConfig {
    pub maker_bps: Decimal,
    pub taker_bps: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            maker_bps: dec!(0),
            taker_bps: dec!(0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PaperEngineConfig {
    pub mode: ExecutionMode,
    pub slippage_model: SlippageModel,
    pub fee: FeeConfig,
}

impl Default for PaperEngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Simple,
            slippage_model: SlippageModel::None,
            fee: FeeConfig::default(),
        }
    }
}

pub struct PaperEngine {
    config: PaperEngineConfig,
    account: RwLock<Account>,
    next_order_id: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct ExecutionStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub avg_win: Money,
    pub avg_loss: Money,
    pub largest_win: Money,
    pub largest_loss: Money,
    pub total_fees: Money,
    pub total_volume: Money,
    pub unrealized_pnl: Money,
}

impl PaperEngine {
    pub fn new(initial_balance: Money, config: PaperEngineConfig) -> Self {
        Self {
            config,
            account: RwLock::new(Account::new(initial_balance)),
            next_order_id: AtomicU64::new(1),
        }
    }

    pub fn account_snapshot(&self) -> Account {
        self.account.read().clone()
    }

    /// Validates inputs, reserves notional, assigns an id, and attempts
    /// immediate fill per the configured mode (§4.F "Placement").
    pub fn place_order(
        &self,
        token_id: &str,
        market: &str,
        side: Side,
        order_type: OrderType,
        price: Decimal,
        size: Decimal,
        book: Option<&OrderBook>,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<Order, TradingError> {
        if size <= Decimal::ZERO {
            return Err(TradingError::invalid("size must be > 0"));
        }
        if matches!(order_type, OrderType::Limit) && price <= Decimal::ZERO {
            return Err(TradingError::invalid("limit order requires price > 0"));
        }

        let mid = book.map(|b| b.midpoint()).unwrap_or(Decimal::ZERO);
        let notional_estimate = match order_type {
            OrderType::Market => mid * size,
            OrderType::Limit => price * size,
        };

        if matches!(side, Side::Buy) {
            let balance = self.account.read().balance;
            if notional_estimate > balance {
                return Err(TradingError::InsufficientBalance {
                    needed: crate::decimal::decimal_to_f64(notional_estimate),
                    available: crate::decimal::decimal_to_f64(balance),
                });
            }
        }

        let id = self.next_order_id.fetch_add(1, AtomicOrdering::SeqCst);
        let mut order = Order {
            id,
            token_id: token_id.to_string(),
            market: market.to_string(),
            side,
            order_type,
            price,
            size,
            filled_size: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            status: OrderStatus::Open,
            expiration,
            fills: Vec::new(),
        };

        info!(order_id = id, %token_id, ?side, ?order_type, "order placed");
        self.account.write().open_orders.insert(id, order.clone());

        match self.config.mode {
            ExecutionMode::Simple => self.try_fill_simple(&mut order, book),
            ExecutionMode::Realistic => self.try_fill_realistic(&mut order, book),
        }

        self.account.write().open_orders.insert(id, order.clone());
        if order.status.is_terminal() {
            self.account.write().open_orders.remove(&id);
        }
        Ok(order)
    }

    /// Mode Simple: fetch mid; BUY fills only if `mid <= limit_price`
    /// (SELL symmetric); fills the entire order at mid.
    fn try_fill_simple(&self, order: &mut Order, book: Option<&OrderBook>) {
        let Some(book) = book else { return };
        let mid = book.midpoint();
        if mid.is_zero() {
            return;
        }
        if matches!(order.order_type, OrderType::Limit) {
            let acceptable = match order.side {
                Side::Buy => mid <= order.price,
                Side::Sell => mid >= order.price,
            };
            if !acceptable {
                return;
            }
        }
        self.apply_fill(order, mid, order.remaining());
    }

    /// Mode Realistic: simulate the opposite side, apply the configured
    /// slippage model, reject LIMIT fills worse than the limit.
    fn try_fill_realistic(&self, order: &mut Order, book: Option<&OrderBook>) {
        let Some(book) = book else { return };
        let remaining = order.remaining();
        let sim = book.simulate_market_order(order.side, remaining);
        if sim.filled.is_zero() {
            return; // no liquidity; leave order open
        }
        let Some(vwap) = sim.avg_price else { return };

        let adjusted = self.apply_slippage(vwap, sim.filled, order.side, book);

        if matches!(order.order_type, OrderType::Limit) {
            let worse = match order.side {
                Side::Buy => adjusted > order.price,
                Side::Sell => adjusted < order.price,
            };
            if worse {
                return; // reject the fill silently
            }
        }

        self.apply_fill(order, adjusted, sim.filled);
    }

    fn apply_slippage(&self, price: Decimal, size: Decimal, side: Side, book: &OrderBook) -> Decimal {
        match self.config.slippage_model {
            SlippageModel::None => price,
            SlippageModel::Fixed => match side {
                Side::Buy => price * (Decimal::ONE + dec!(0.001)),
                Side::Sell => price * (Decimal::ONE - dec!(0.001)),
            },
            SlippageModel::Linear => {
                let adj = price * size * dec!(0.0001);
                match side {
                    Side::Buy => price + adj,
                    Side::Sell => price - adj,
                }
            }
            SlippageModel::SqrtRoot => {
                let size_f = crate::decimal::decimal_to_f64(size).max(0.0).sqrt();
                let sqrt_size =
                    rust_decimal::Decimal::from_f64_retain(size_f).unwrap_or(Decimal::ZERO);
                let adj = price * sqrt_size * dec!(0.001);
                match side {
                    Side::Buy => price + adj,
                    Side::Sell => price - adj,
                }
            }
            SlippageModel::Orderbook => {
                let _ = book;
                price // already the walked VWAP
            }
        }
    }

    /// Fee = `price*size*fee_bps/10000` (maker bps for LIMIT, taker bps
    /// for MARKET). Appends the fill, updates order/position/account
    /// state, and records a `Trade` (§4.F "Execution & accounting").
    fn apply_fill(&self, order: &mut Order, price: Decimal, size: Decimal) {
        if size <= Decimal::ZERO {
            return;
        }
        let fee_bps = match order.order_type {
            OrderType::Limit => self.config.fee.maker_bps,
            OrderType::Market => self.config.fee.taker_bps,
        };
        let fee = price * size * fee_bps / dec!(10000);
        let now = Utc::now();

        order.fills.push(Fill {
            price,
            size,
            timestamp: now,
            fee,
        });
        let prev_filled = order.filled_size;
        order.filled_size += size;
        order.avg_fill_price = if order.filled_size > Decimal::ZERO {
            (order.avg_fill_price * prev_filled + price * size) / order.filled_size
        } else {
            price
        };
        order.status = if order.filled_size >= order.size {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        let mut account = self.account.write();
        match order.side {
            Side::Buy => account.balance -= price * size + fee,
            Side::Sell => account.balance += price * size - fee,
        }

        let pnl = update_position(&mut account, order, price, size, now);

        account.trade_history.push(Trade {
            order_id: order.id,
            token_id: order.token_id.clone(),
            side: order.side,
            price,
            size,
            fee,
            pnl,
            timestamp: now,
        });
        drop(account);

        info!(order_id = order.id, %price, %size, %fee, %pnl, "order filled");
    }

    /// For each open LIMIT order on the tick's asset: fill at the limit
    /// price if the mid crosses it; expire any order whose expiration
    /// has passed (§4.F "Tick processing").
    pub fn process_tick(&self, token_id: &str, mid: Decimal, now: DateTime<Utc>) {
        let order_ids: Vec<u64> = {
            let account = self.account.read();
            account
                .open_orders
                .values()
                .filter(|o| o.token_id == token_id)
                .map(|o| o.id)
                .collect()
        };

        for id in order_ids {
            let mut order = match self.account.read().open_orders.get(&id).cloned() {
                Some(o) => o,
                None => continue,
            };

            if let Some(exp) = order.expiration {
                if exp <= now {
                    order.status = OrderStatus::Expired;
                    self.account.write().open_orders.remove(&id);
                    continue;
                }
            }

            if matches!(order.order_type, OrderType::Limit) && mid > Decimal::ZERO {
                let crosses = match order.side {
                    Side::Buy => mid <= order.price,
                    Side::Sell => mid >= order.price,
                };
                if crosses {
                    self.apply_fill(&mut order, order.price, order.remaining());
                    if order.status.is_terminal() {
                        self.account.write().open_orders.remove(&id);
                    } else {
                        self.account.write().open_orders.insert(id, order);
                    }
                }
            }
        }
    }

    /// Cancellation is only valid from OPEN/PARTIALLY_FILLED.
    pub fn cancel_order(&self, id: u64) -> Result<(), TradingError> {
        let mut account = self.account.write();
        match account.open_orders.get(&id) {
            None => Ok(()), // "not found" or no-op; never mutates balance
            Some(order) if !order.status.is_cancelable() => Ok(()),
            Some(_) => {
                if let Some(mut order) = account.open_orders.remove(&id) {
                    order.status = OrderStatus::Canceled;
                }
                Ok(())
            }
        }
    }

    pub fn mark_positions(&self, token_id: &str, current_price: Decimal) {
        let mut account = self.account.write();
        if let Some(pos) = account.positions.get_mut(token_id) {
            pos.mark_unrealized(current_price);
            pos.updated_at = Utc::now();
        }
    }

    /// Derived from trade history: totals, win/loss stats, fees, volume,
    /// and unrealized P&L summed over positions (§4.F "Statistics").
    pub fn stats(&self) -> ExecutionStats {
        let account = self.account.read();
        let mut wins = 0u64;
        let mut losses = 0u64;
        let mut win_total = Decimal::ZERO;
        let mut loss_total = Decimal::ZERO;
        let mut largest_win = Decimal::ZERO;
        let mut largest_loss = Decimal::ZERO;
        let mut total_fees = Decimal::ZERO;
        let mut total_volume = Decimal::ZERO;

        for t in &account.trade_history {
            total_fees += t.fee;
            total_volume += t.price * t.size;
            if t.pnl > Decimal::ZERO {
                wins += 1;
                win_total += t.pnl;
                largest_win = largest_win.max(t.pnl);
            } else if t.pnl < Decimal::ZERO {
                losses += 1;
                loss_total += t.pnl;
                largest_loss = largest_loss.min(t.pnl);
            }
        }

        let total_trades = account.trade_history.len() as u64;
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };

        let unrealized_pnl: Decimal = account.positions.values().map(|p| p.unrealized_pnl).sum();

        ExecutionStats {
            total_trades,
            wins,
            losses,
            win_rate,
            avg_win: if wins > 0 {
                win_total / Decimal::from(wins)
            } else {
                Decimal::ZERO
            },
            avg_loss: if losses > 0 {
                loss_total / Decimal::from(losses)
            } else {
                Decimal::ZERO
            },
            largest_win,
            largest_loss,
            total_fees,
            total_volume,
            unrealized_pnl,
        }
    }
}

/// Returns the trade P&L for this fill (§4.F "Position update").
fn update_position(
    account: &mut Account,
    order: &Order,
    price: Decimal,
    size: Decimal,
    now: DateTime<Utc>,
) -> Decimal {
    let key = order.token_id.clone();
    let existing = account.positions.get(&key).cloned();

    match existing {
        None => {
            account.positions.insert(
                key,
                Position {
                    token_id: order.token_id.clone(),
                    market: order.market.clone(),
                    side: order.side,
                    size,
                    avg_entry: price,
                    current_price: price,
                    unrealized_pnl: Decimal::ZERO,
                    realized_pnl: Decimal::ZERO,
                    opened_at: now,
                    updated_at: now,
                },
            );
            Decimal::ZERO
        }
        Some(mut pos) if pos.side == order.side => {
            let new_size = pos.size + size;
            pos.avg_entry = (pos.avg_entry * pos.size + price * size) / new_size;
            pos.size = new_size;
            pos.updated_at = now;
            account.positions.insert(order.token_id.clone(), pos);
            Decimal::ZERO
        }
        Some(mut pos) => {
            let closing = size.min(pos.size);
            let pnl = match pos.side {
                Side::Buy => (price - pos.avg_entry) * closing,
                Side::Sell => (pos.avg_entry - price) * closing,
            };
            pos.size -= closing;
            pos.realized_pnl += pnl;
            pos.updated_at = now;

            let residual = size - closing;
            if pos.size > Decimal::ZERO {
                account.positions.insert(order.token_id.clone(), pos);
            } else if residual > Decimal::ZERO {
                account.positions.insert(
                    order.token_id.clone(),
                    Position {
                        token_id: order.token_id.clone(),
                        market: order.market.clone(),
                        side: order.side,
                        size: residual,
                        avg_entry: price,
                        current_price: price,
                        unrealized_pnl: Decimal::ZERO,
                        realized_pnl: pos.realized_pnl,
                        opened_at: now,
                        updated_at: now,
                    },
                );
            } else {
                account.positions.remove(&order.token_id);
            }
            pnl
        }
    }
}

pub type PositionBook = HashMap<String, Position>;
pub type SharedPaperEngine = Arc<PaperEngine>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book_with_mid(bid: Decimal, ask: Decimal) -> OrderBook {
        use crate::model::PriceLevel;
        let book = OrderBook::new("a1", "m1");
        book.set_bids(vec![PriceLevel::new(bid, dec!(1000))]);
        book.set_asks(vec![PriceLevel::new(ask, dec!(1000))]);
        book
    }

    /// Scenario 4 from §8: order accounting.
    #[test]
    fn order_accounting_scenario() {
        let engine = PaperEngine::new(dec!(10000), PaperEngineConfig::default());
        let book = book_with_mid(dec!(0.50), dec!(0.50));

        let order = engine
            .place_order(
                "tok",
                "mkt",
                Side::Buy,
                OrderType::Market,
                Decimal::ZERO,
                dec!(100),
                Some(&book),
                None,
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);

        let account = engine.account_snapshot();
        assert_eq!(account.balance, dec!(9950));
        let pos = account.positions.get("tok").unwrap();
        assert_eq!(pos.size, dec!(100));
        assert_eq!(pos.avg_entry, dec!(0.50));
        assert_eq!(pos.realized_pnl, Decimal::ZERO);

        let book2 = book_with_mid(dec!(0.60), dec!(0.60));
        engine
            .place_order(
                "tok",
                "mkt",
                Side::Sell,
                OrderType::Market,
                Decimal::ZERO,
                dec!(50),
                Some(&book2),
                None,
            )
            .unwrap();

        let account2 = engine.account_snapshot();
        assert_eq!(account2.balance, dec!(9980));
        let pos2 = account2.positions.get("tok").unwrap();
        assert_eq!(pos2.size, dec!(50));
        assert_eq!(pos2.realized_pnl, dec!(5));
    }

    #[test]
    fn insufficient_balance_is_rejected() {
        let engine = PaperEngine::new(dec!(10), PaperEngineConfig::default());
        let book = book_with_mid(dec!(0.5), dec!(0.5));
        let result = engine.place_order(
            "tok",
            "mkt",
            Side::Buy,
            OrderType::Limit,
            dec!(0.5),
            dec!(1000),
            Some(&book),
            None,
        );
        assert!(matches!(result, Err(TradingError::InsufficientBalance { .. })));
    }

    #[test]
    fn cancel_is_noop_on_unknown_order() {
        let engine = PaperEngine::new(dec!(1000), PaperEngineConfig::default());
        assert!(engine.cancel_order(999).is_ok());
        assert_eq!(engine.account_snapshot().balance, dec!(1000));
    }

    #[test]
    fn expiration_at_now_expires_on_next_tick() {
        let engine = PaperEngine::new(dec!(1000), PaperEngineConfig::default());
        let now = Utc::now();
        let order = engine
            .place_order(
                "tok",
                "mkt",
                Side::Buy,
                OrderType::Limit,
                dec!(0.1),
                dec!(10),
                None,
                Some(now),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        engine.process_tick("tok", dec!(0.5), now);
        assert!(engine.account_snapshot().open_orders.get(&order.id).is_none());
    }
}
