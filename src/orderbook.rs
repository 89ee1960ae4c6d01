//! Component B — order book.
//!
//! Grounded on `scrapers/polymarket_book_store.rs`'s `BookSnapshot` /
//! `apply_level_update` shape, rewritten onto `Decimal` prices/sizes and
//! extended with `vwap`/`simulate_market_order` (§4.B) which the source
//! book store never needed since it only serves snapshots, not matching.

use crate::decimal::{Money, Price};
use crate::error::TradingError;
use crate::model::{PriceLevel, Side};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct Sides {
    bids: Vec<PriceLevel>, // strictly descending by price
    asks: Vec<PriceLevel>, // strictly ascending by price
    timestamp: DateTime<Utc>,
}

/// Single reader-writer lock guards both sides and the timestamp (§4.B
/// concurrency note); readers always copy levels out before returning so
/// no caller ever observes torn state.
pub struct OrderBook {
    pub asset_id: String,
    pub market: String,
    inner: RwLock<Sides>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestLevel {
    pub price: Price,
    pub size: Money,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub fills: Vec<(Price, Money)>,
    pub filled: Money,
    pub unfilled: Money,
    pub avg_price: Option<Price>,
    /// `(avg - first_fill_price) / first_fill_price`
    pub price_impact: Option<Decimal>,
}

impl OrderBook {
    pub fn new(asset_id: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            market: market.into(),
            inner: RwLock::new(Sides {
                bids: Vec::new(),
                asks: Vec::new(),
                timestamp: Utc::now(),
            }),
        }
    }

    pub fn set_bids(&self, mut levels: Vec<PriceLevel>) {
        levels.retain(|l| l.size > Decimal::ZERO);
        levels.sort_by(|a, b| b.price.cmp(&a.price));
        let mut guard = self.inner.write();
        guard.bids = levels;
        guard.timestamp = Utc::now();
    }

    pub fn set_asks(&self, mut levels: Vec<PriceLevel>) {
        levels.retain(|l| l.size > Decimal::ZERO);
        levels.sort_by(|a, b| a.price.cmp(&b.price));
        let mut guard = self.inner.write();
        guard.asks = levels;
        guard.timestamp = Utc::now();
    }

    /// Upsert by exact price equality via binary search on the sorted
    /// side; `size == 0` removes the matching level (§4.B).
    pub fn update_level(&self, side: Side, price: Price, size: Money) {
        let mut guard = self.inner.write();
        guard.timestamp = Utc::now();
        let levels = match side {
            Side::Buy => &mut guard.bids,
            Side::Sell => &mut guard.asks,
        };
        let descending = matches!(side, Side::Buy);
        let idx = levels.binary_search_by(|probe| {
            if descending {
                price.cmp(&probe.price)
            } else {
                probe.price.cmp(&price)
            }
        });
        match idx {
            Ok(pos) => {
                if size <= Decimal::ZERO {
                    levels.remove(pos);
                } else {
                    levels[pos].size = size;
                }
            }
            Err(pos) => {
                if size > Decimal::ZERO {
                    levels.insert(pos, PriceLevel::new(price, size));
                }
            }
        }
    }

    pub fn best_bid(&self) -> BestLevel {
        let guard = self.inner.read();
        guard
            .bids
            .first()
            .map(|l| BestLevel {
                price: l.price,
                size: l.size,
            })
            .unwrap_or(BestLevel {
                price: Decimal::ZERO,
                size: Decimal::ZERO,
            })
    }

    pub fn best_ask(&self) -> BestLevel {
        let guard = self.inner.read();
        guard
            .asks
            .first()
            .map(|l| BestLevel {
                price: l.price,
                size: l.size,
            })
            .unwrap_or(BestLevel {
                price: Decimal::ZERO,
                size: Decimal::ZERO,
            })
    }

    /// `(best_bid + best_ask) / 2`; zero if either side is empty.
    pub fn midpoint(&self) -> Price {
        let guard = self.inner.read();
        match (guard.bids.first(), guard.asks.first()) {
            (Some(b), Some(a)) => (b.price + a.price) / Decimal::TWO,
            _ => Decimal::ZERO,
        }
    }

    pub fn spread(&self) -> Price {
        let guard = self.inner.read();
        match (guard.bids.first(), guard.asks.first()) {
            (Some(b), Some(a)) => a.price - b.price,
            _ => Decimal::ZERO,
        }
    }

    /// `spread_bps = (spread / mid) * 10000`.
    pub fn spread_bps(&self) -> Decimal {
        let mid = self.midpoint();
        if mid.is_zero() {
            return Decimal::ZERO;
        }
        (self.spread() / mid) * Decimal::from(10_000)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.read().timestamp
    }

    pub fn bids_snapshot(&self) -> Vec<PriceLevel> {
        self.inner.read().bids.clone()
    }

    pub fn asks_snapshot(&self) -> Vec<PriceLevel> {
        self.inner.read().asks.clone()
    }

    /// Walk the far side (buyer walks asks ascending, seller walks bids
    /// descending). Returns `(vwap, feasible)`.
    pub fn vwap(&self, side: Side, size: Money) -> Result<Price, TradingError> {
        let guard = self.inner.read();
        let far_side: &[PriceLevel] = match side {
            Side::Buy => &guard.asks,
            Side::Sell => &guard.bids,
        };
        let (cost, filled) = walk(far_side, size);
        let remaining = size - filled;
        if remaining > Decimal::ZERO {
            return Err(TradingError::InsufficientLiquidity {
                missing: crate::decimal::decimal_to_f64(remaining),
            });
        }
        Ok(cost / size)
    }

    /// Same walk as `vwap` but records every individual fill, the
    /// unfilled remainder, and price impact. Does not mutate the book.
    /// Acquires the read lock exactly once (§9 open question resolution).
    pub fn simulate_market_order(&self, side: Side, size: Money) -> MatchResult {
        let guard = self.inner.read();
        let far_side: &[PriceLevel] = match side {
            Side::Buy => &guard.asks,
            Side::Sell => &guard.bids,
        };

        let mut fills = Vec::new();
        let mut remaining = size;
        let mut cost = Decimal::ZERO;
        for level in far_side {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = level.size.min(remaining);
            if take <= Decimal::ZERO {
                continue;
            }
            fills.push((level.price, take));
            cost += level.price * take;
            remaining -= take;
        }

        let filled = size - remaining;
        let avg_price = if filled > Decimal::ZERO {
            Some(cost / filled)
        } else {
            None
        };
        let price_impact = match (avg_price, fills.first()) {
            (Some(avg), Some((first_price, _))) if !first_price.is_zero() => {
                Some((avg - *first_price) / *first_price)
            }
            _ => None,
        };

        MatchResult {
            fills,
            filled,
            unfilled: remaining,
            avg_price,
            price_impact,
        }
    }
}

fn walk(levels: &[PriceLevel], size: Money) -> (Money, Money) {
    let mut remaining = size;
    let mut cost = Decimal::ZERO;
    for level in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = level.size.min(remaining);
        cost += level.price * take;
        remaining -= take;
    }
    (cost, size - remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_book() -> OrderBook {
        let book = OrderBook::new("asset-1", "market-1");
        book.set_bids(vec![
            PriceLevel::new(dec!(0.49), dec!(100)),
            PriceLevel::new(dec!(0.50), dec!(200)),
            PriceLevel::new(dec!(0.48), dec!(150)),
        ]);
        book.set_asks(vec![
            PriceLevel::new(dec!(0.52), dec!(180)),
            PriceLevel::new(dec!(0.51), dec!(120)),
            PriceLevel::new(dec!(0.53), dec!(250)),
        ]);
        book
    }

    /// Scenario 1 from §8: book sort.
    #[test]
    fn book_sort_scenario() {
        let book = sample_book();
        assert_eq!(book.best_bid(), BestLevel { price: dec!(0.50), size: dec!(200) });
        assert_eq!(book.best_ask(), BestLevel { price: dec!(0.51), size: dec!(120) });
        assert_eq!(book.midpoint(), dec!(0.505));
        let spread_bps = book.spread_bps();
        assert!((spread_bps - dec!(198)).abs() < dec!(1), "spread_bps={spread_bps}");
    }

    /// Scenario 2 from §8: VWAP multi-level.
    #[test]
    fn vwap_multi_level_scenario() {
        let book = OrderBook::new("asset-2", "market-2");
        book.set_asks(vec![
            PriceLevel::new(dec!(0.50), dec!(50)),
            PriceLevel::new(dec!(0.52), dec!(50)),
            PriceLevel::new(dec!(0.55), dec!(100)),
        ]);
        let vwap = book.vwap(Side::Buy, dec!(100)).unwrap();
        assert_eq!(vwap, dec!(0.51));
        let sim = book.simulate_market_order(Side::Buy, dec!(100));
        assert_eq!(sim.filled, dec!(100));
        assert_eq!(sim.unfilled, Decimal::ZERO);
    }

    #[test]
    fn empty_book_boundary_behaviors() {
        let book = OrderBook::new("empty", "empty");
        assert_eq!(book.best_bid().price, Decimal::ZERO);
        assert_eq!(book.best_ask().price, Decimal::ZERO);
        assert_eq!(book.midpoint(), Decimal::ZERO);
        assert_eq!(book.spread(), Decimal::ZERO);
        assert!(book.vwap(Side::Buy, dec!(10)).is_err());
    }

    #[test]
    fn buy_exactly_at_best_ask_size_fills_exactly() {
        let book = OrderBook::new("a", "m");
        book.set_asks(vec![PriceLevel::new(dec!(0.5), dec!(100))]);
        let sim = book.simulate_market_order(Side::Buy, dec!(100));
        assert_eq!(sim.filled, dec!(100));
        assert_eq!(sim.unfilled, Decimal::ZERO);
    }

    #[test]
    fn buy_exceeding_liquidity_reports_deficit() {
        let book = OrderBook::new("a", "m");
        book.set_asks(vec![PriceLevel::new(dec!(0.5), dec!(40))]);
        let sim = book.simulate_market_order(Side::Buy, dec!(100));
        assert_eq!(sim.filled, dec!(40));
        assert_eq!(sim.unfilled, dec!(60));
    }

    #[test]
    fn update_level_zero_size_removes_level() {
        let book = sample_book();
        book.update_level(Side::Buy, dec!(0.50), Decimal::ZERO);
        assert_eq!(book.best_bid().price, dec!(0.49));
    }

    #[test]
    fn update_level_upserts_existing_price() {
        let book = sample_book();
        book.update_level(Side::Buy, dec!(0.50), dec!(999));
        assert_eq!(book.best_bid().size, dec!(999));
    }
}
