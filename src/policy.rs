//! Component H — risk / policy engine.
//!
//! Style grounded on `risk.rs` (struct holding limits, `Result`-returning
//! check methods) and `vault/engine.rs` (`utc_day_start` day-rollover
//! helper, `can_spend_calls`/`spend_call` rate gating, cooldown-window
//! bookkeeping). Semantics rewritten to §4.H's ordered rule list — the
//! source `risk.rs` computes VaR/CVaR and blends calibration bins, which
//! SPEC_FULL.md does not call for; none of that survives here.

use crate::decimal::Money;
use crate::error::TradingError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PolicyLimits {
    pub blocked_markets: Vec<String>,
    pub allowed_markets: Option<Vec<String>>,
    pub min_order_size: Money,
    pub max_order_size: Money,
    pub max_open_orders: u32,
    pub max_daily_orders: u32,
    pub max_daily_volume: Money,
    pub max_daily_loss: Money,
    pub max_position_size: Money,
    pub max_total_exposure: Money,
    pub max_concentration: f64,
    pub cooldown_after_loss: chrono::Duration,
    pub max_session_duration: chrono::Duration,
    pub max_slippage: f64,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            blocked_markets: Vec::new(),
            allowed_markets: None,
            min_order_size: Decimal::from(1),
            max_order_size: Decimal::from(10_000),
            max_open_orders: 20,
            max_daily_orders: 200,
            max_daily_volume: Decimal::from(50_000),
            max_daily_loss: Decimal::from(2_000),
            max_position_size: Decimal::from(5_000),
            max_total_exposure: Decimal::from(20_000),
            max_concentration: 0.40,
            cooldown_after_loss: chrono::Duration::minutes(5),
            max_session_duration: chrono::Duration::hours(12),
            max_slippage: 0.02,
        }
    }
}

impl PolicyLimits {
    pub fn from_env() -> Self {
        let mut limits = Self::default();
        if let Ok(v) = std::env::var("POLICY_MAX_OPEN_ORDERS") {
            if let Ok(n) = v.parse() {
                limits.max_open_orders = n;
            }
        }
        if let Ok(v) = std::env::var("POLICY_MAX_DAILY_LOSS") {
            if let Ok(n) = v.parse::<f64>() {
                limits.max_daily_loss = Decimal::from_f64_retain(n).unwrap_or(limits.max_daily_loss);
            }
        }
        if let Ok(v) = std::env::var("POLICY_MAX_POSITION_SIZE") {
            if let Ok(n) = v.parse::<f64>() {
                limits.max_position_size =
                    Decimal::from_f64_retain(n).unwrap_or(limits.max_position_size);
            }
        }
        if let Ok(v) = std::env::var("POLICY_COOLDOWN_SECS") {
            if let Ok(n) = v.parse::<i64>() {
                limits.cooldown_after_loss = chrono::Duration::seconds(n);
            }
        }
        limits
    }
}

use rust_decimal::prelude::FromPrimitive;

#[derive(Debug, Clone, Default)]
struct DailyCounters {
    day_of_year: u32,
    year: i32,
    daily_orders: u32,
    daily_volume: Money,
    daily_loss: Money,
}

struct State {
    counters: DailyCounters,
    open_order_count: u32,
    positions: HashMap<String, Decimal>,
    last_loss_time: Option<DateTime<Utc>>,
    session_start: DateTime<Utc>,
}

/// Single mutex across all fields (§5 shared mutable state: "Risk
/// engine: single mutex across all fields").
pub struct PolicyEngine {
    limits: PolicyLimits,
    state: Mutex<State>,
}

impl PolicyEngine {
    pub fn new(limits: PolicyLimits) -> Self {
        let now = Utc::now();
        Self {
            limits,
            state: Mutex::new(State {
                counters: day_counters_for(now),
                open_order_count: 0,
                positions: HashMap::new(),
                last_loss_time: None,
                session_start: now,
            }),
        }
    }

    fn roll_day_if_needed(&self, state: &mut State, now: DateTime<Utc>) {
        let today = day_counters_for(now);
        if today.day_of_year != state.counters.day_of_year || today.year != state.counters.year {
            state.counters = today;
        }
    }

    /// Enforces the §4.H ordered rule list; fails with the first failing
    /// rule.
    pub fn check(
        &self,
        market: &str,
        size: Decimal,
        price: Decimal,
        is_buy: bool,
        now: DateTime<Utc>,
    ) -> Result<(), TradingError> {
        let mut state = self.state.lock();
        self.roll_day_if_needed(&mut state, now);

        if self.limits.blocked_markets.iter().any(|m| m == market) {
            return Err(TradingError::policy("market is blocked"));
        }
        if let Some(allowed) = &self.limits.allowed_markets {
            if !allowed.iter().any(|m| m == market) {
                return Err(TradingError::policy("market is not in the allowlist"));
            }
        }

        let notional = size * price;
        if notional < self.limits.min_order_size {
            return Err(TradingError::policy("order notional below minimum"));
        }
        if notional > self.limits.max_order_size {
            return Err(TradingError::policy("order notional above maximum"));
        }

        if state.open_order_count >= self.limits.max_open_orders {
            return Err(TradingError::policy("too many open orders"));
        }
        if state.counters.daily_orders >= self.limits.max_daily_orders {
            return Err(TradingError::policy("daily order count limit reached"));
        }
        if state.counters.daily_volume + notional > self.limits.max_daily_volume {
            return Err(TradingError::policy("daily volume limit reached"));
        }
        if state.counters.daily_loss > self.limits.max_daily_loss {
            return Err(TradingError::policy("daily loss limit reached"));
        }

        let current = state.positions.get(market).copied().unwrap_or(Decimal::ZERO);
        let delta = if is_buy { notional } else { -notional };
        let new_position_size = (current + delta).abs();
        if new_position_size > self.limits.max_position_size {
            return Err(TradingError::policy("position size limit exceeded"));
        }

        let total_exposure: Decimal = state.positions.values().map(|p| p.abs()).sum::<Decimal>() + notional;
        if total_exposure > self.limits.max_total_exposure {
            return Err(TradingError::policy("total exposure limit exceeded"));
        }

        let open_market_count = state.positions.values().filter(|p| !p.is_zero()).count()
            + if current.is_zero() { 1 } else { 0 };
        if open_market_count > 1 && total_exposure > Decimal::ZERO {
            let concentration = crate::decimal::decimal_to_f64(new_position_size)
                / crate::decimal::decimal_to_f64(total_exposure);
            if concentration > self.limits.max_concentration {
                return Err(TradingError::policy("single-market concentration limit exceeded"));
            }
        }

        if let Some(last_loss) = state.last_loss_time {
            if now - last_loss < self.limits.cooldown_after_loss {
                return Err(TradingError::policy("cooldown after loss is active"));
            }
        }

        if now - state.session_start > self.limits.max_session_duration {
            return Err(TradingError::policy("session duration limit exceeded"));
        }

        Ok(())
    }

    /// Rejects a fill whose actual execution price deviates from the
    /// expected price by more than `max_slippage` (relative).
    pub fn check_slippage(&self, expected: Decimal, actual: Decimal) -> Result<(), TradingError> {
        if expected.is_zero() {
            return Ok(());
        }
        let deviation = ((actual - expected) / expected).abs();
        let deviation_f = crate::decimal::decimal_to_f64(deviation);
        if deviation_f > self.limits.max_slippage {
            return Err(TradingError::policy("fill exceeds maximum allowed slippage"));
        }
        Ok(())
    }

    /// Updates the position mirror, daily volume/loss counters, and
    /// cooldown timer (§4.H "State evolution").
    pub fn record_fill(&self, market: &str, notional: Decimal, is_buy: bool, pnl: Decimal, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        self.roll_day_if_needed(&mut state, now);

        let entry = state.positions.entry(market.to_string()).or_insert(Decimal::ZERO);
        *entry += if is_buy { notional } else { -notional };

        state.counters.daily_volume += notional;
        state.counters.daily_orders += 1;
        if pnl < Decimal::ZERO {
            state.counters.daily_loss += -pnl;
            state.last_loss_time = Some(now);
        }
    }

    pub fn record_order_opened(&self) {
        self.state.lock().open_order_count += 1;
    }

    pub fn record_order_closed(&self) {
        let mut state = self.state.lock();
        state.open_order_count = state.open_order_count.saturating_sub(1);
    }

    pub fn daily_snapshot(&self) -> (u32, Money, Money) {
        let state = self.state.lock();
        (
            state.counters.daily_orders,
            state.counters.daily_volume,
            state.counters.daily_loss,
        )
    }
}

fn day_counters_for(now: DateTime<Utc>) -> DailyCounters {
    use chrono::Datelike;
    DailyCounters {
        day_of_year: now.ordinal(),
        year: now.year(),
        daily_orders: 0,
        daily_volume: Decimal::ZERO,
        daily_loss: Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn blocked_market_is_rejected() {
        let mut limits = PolicyLimits::default();
        limits.blocked_markets.push("bad-market".to_string());
        let engine = PolicyEngine::new(limits);
        let result = engine.check("bad-market", dec!(10), dec!(0.5), true, Utc::now());
        assert!(matches!(result, Err(TradingError::PolicyReject { .. })));
    }

    #[test]
    fn order_below_minimum_size_is_rejected() {
        let engine = PolicyEngine::new(PolicyLimits::default());
        let result = engine.check("m", dec!(0.1), dec!(0.1), true, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn daily_counters_reset_on_day_rollover() {
        let engine = PolicyEngine::new(PolicyLimits::default());
        let day1 = Utc::now();
        engine.record_fill("m", dec!(100), true, dec!(-10), day1);
        let (_orders, _vol, loss) = engine.daily_snapshot();
        assert_eq!(loss, dec!(10));

        let day2 = day1 + chrono::Duration::days(2);
        // First check on the new day rolls the counters before evaluating.
        let _ = engine.check("m", dec!(10), dec!(1), true, day2);
        let (_orders2, _vol2, loss2) = engine.daily_snapshot();
        assert_eq!(loss2, Decimal::ZERO);
    }

    #[test]
    fn cooldown_after_loss_blocks_trading() {
        let engine = PolicyEngine::new(PolicyLimits::default());
        let now = Utc::now();
        engine.record_fill("m", dec!(100), true, dec!(-50), now);
        let result = engine.check("m", dec!(10), dec!(1), true, now + chrono::Duration::seconds(1));
        assert!(matches!(result, Err(TradingError::PolicyReject { .. })));
    }

    #[test]
    fn slippage_check_rejects_large_deviation() {
        let engine = PolicyEngine::new(PolicyLimits::default());
        assert!(engine.check_slippage(dec!(0.50), dec!(0.53)).is_err());
        assert!(engine.check_slippage(dec!(0.50), dec!(0.505)).is_ok());
    }
}
