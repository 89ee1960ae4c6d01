//! Component G — edge / signal engine.
//!
//! Grounded on `vault/kelly.rs`'s Kelly formula shape (validation
//! branches, then-compute-then-cap style) and `risk.rs`'s calibration
//! machinery (`CalibrationBin`/`CalibrationModel`), generalized to the
//! four calibration modes and agree-direction gate of §4.G, neither of
//! which the source calibration registry implements (it blends a single
//! scalar confidence against history, not a 3-way softmax blend).

use crate::decimal::{clamp_calibrated, clamp_prob};
use crate::error::TradingError;
use crate::model::{EdgeResult, MatchOutcome, Prob3};
use crate::orderbook::OrderBook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelMode {
    V0,
    Mathshard,
    V0Blend,
    V1,
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationParams {
    pub mode: ModelMode,
    /// blend weight for `V0Blend`.
    pub alpha: f64,
    /// temperature for `V1`, default ≈ 1.046.
    pub temperature: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            mode: ModelMode::V0,
            alpha: 0.10,
            temperature: 1.046,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationOutcome {
    pub q: Prob3,
    pub neutralized: bool,
}

/// `Prob3Source`-shaped input: a market quote and (optionally) a model
/// estimate, both required to be complete 3-way quotes for calibration
/// modes that use the model (§4.G: "Inputs to calibration require a
/// 3-way market quote").
pub fn calibrate(
    market: Prob3,
    model: Option<Prob3>,
    outcome: MatchOutcome,
    params: CalibrationParams,
) -> Result<CalibrationOutcome, TradingError> {
    if market.home <= 0.0 && market.draw <= 0.0 && market.away <= 0.0 {
        return Err(TradingError::IncompleteMarketGroup(
            "market quote missing all three outcomes".to_string(),
        ));
    }

    let market_n = market.normalize();

    let (q, neutralized) = match params.mode {
        ModelMode::V0 => (market_n, false),
        ModelMode::Mathshard => {
            let model = model.ok_or_else(|| {
                TradingError::IncompleteMarketGroup("mathshard mode requires model probabilities".into())
            })?;
            (model.normalize(), false)
        }
        ModelMode::V0Blend => {
            let model = model.ok_or_else(|| {
                TradingError::IncompleteMarketGroup("v0blend mode requires model probabilities".into())
            })?;
            v0_blend(market_n, model, outcome, params.alpha)
        }
        ModelMode::V1 => (temperature_scale(market_n, params.temperature), false),
    };

    Ok(CalibrationOutcome {
        q: clamp_prob3(q),
        neutralized,
    })
}

fn clamp_prob3(p: Prob3) -> Prob3 {
    Prob3::new(
        clamp_calibrated(p.home),
        clamp_calibrated(p.draw),
        clamp_calibrated(p.away),
    )
}

/// log-space blend `log q_i = (1-alpha)*log p_market_i + alpha*log p_model_i`
/// then softmax, followed by the agree-direction gate (§4.G).
fn v0_blend(market: Prob3, model: Prob3, outcome: MatchOutcome, alpha: f64) -> (Prob3, bool) {
    let blend_one = |m: f64, mo: f64| -> f64 {
        let m = clamp_prob(m);
        let mo = clamp_prob(mo);
        (1.0 - alpha) * m.ln() + alpha * mo.ln()
    };

    let logits = [
        blend_one(market.home, model.home),
        blend_one(market.draw, model.draw),
        blend_one(market.away, model.away),
    ];
    let max_logit = logits.iter().cloned().fold(f64::MIN, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max_logit).exp()).collect();
    let sum: f64 = exps.iter().sum();
    let blended = Prob3::new(exps[0] / sum, exps[1] / sum, exps[2] / sum);

    let market_outcome = market.get(outcome);
    let model_outcome = model.get(outcome);
    let blended_outcome = blended.get(outcome);

    let delta_model = model_outcome - market_outcome;
    let delta_q = blended_outcome - market_outcome;

    let disagree = delta_model.abs() > 1e-3
        && delta_q.abs() > 1e-3
        && delta_model.signum() != delta_q.signum();
    let overpriced_but_blend_edges = delta_model < -0.01 && delta_q > 0.0;

    if disagree || overpriced_but_blend_edges {
        (market, true)
    } else {
        (blended, false)
    }
}

/// `q_i ∝ p_market_i^(1/T)`, equivalent to softmax over scaled log-probs.
fn temperature_scale(market: Prob3, temperature: f64) -> Prob3 {
    if (temperature - 1.0).abs() < 1e-9 {
        return market; // T=1 is identity on market probs (§8)
    }
    let inv_t = 1.0 / temperature.max(1e-6);
    let scaled = |p: f64| clamp_prob(p).powf(inv_t);
    let raw = Prob3::new(scaled(market.home), scaled(market.draw), scaled(market.away));
    raw.normalize()
}

#[derive(Debug, Clone, Copy)]
pub struct FeeModel {
    pub fee_rate: f64,
}

impl FeeModel {
    /// `fee = fee_rate * notional`; `effective_price = vwap + fee/notional`.
    pub fn fee(&self, notional_usd: f64) -> f64 {
        self.fee_rate * notional_usd
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VwapQuote {
    pub vwap: f64,
    pub best_ask: f64,
    pub total_depth_usd: f64,
}

/// Targets a dollar notional `S_USD`; walks asks and returns
/// `(vwap, best_ask, total_depth_usd)`. Degrades to mid/best-ask when the
/// book is absent; fails if neither is available (§4.G "VWAP fetch").
pub fn fetch_vwap(
    book: Option<&OrderBook>,
    fallback_mid: Option<f64>,
    s_usd: f64,
) -> Result<VwapQuote, TradingError> {
    if let Some(book) = book {
        let best_ask = crate::decimal::decimal_to_f64(book.best_ask().price);
        if best_ask <= 0.0 {
            return degrade(fallback_mid);
        }
        let target_shares = s_usd / best_ask;
        let target = rust_decimal::Decimal::from_f64_retain(target_shares).unwrap_or_default();
        match book.vwap(crate::model::Side::Buy, target) {
            Ok(vwap) => {
                let depth: f64 = book
                    .asks_snapshot()
                    .iter()
                    .map(|l| crate::decimal::decimal_to_f64(l.price * l.size))
                    .sum();
                Ok(VwapQuote {
                    vwap: crate::decimal::decimal_to_f64(vwap),
                    best_ask,
                    total_depth_usd: depth,
                })
            }
            Err(_) => degrade(fallback_mid),
        }
    } else {
        degrade(fallback_mid)
    }
}

fn degrade(fallback_mid: Option<f64>) -> Result<VwapQuote, TradingError> {
    match fallback_mid {
        Some(mid) if mid > 0.0 => Ok(VwapQuote {
            vwap: mid,
            best_ask: mid,
            total_depth_usd: 0.0,
        }),
        _ => Err(TradingError::InsufficientLiquidity { missing: 0.0 }),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KellyConfig {
    /// fractional-Kelly exponent, <= 1.
    pub exponent: f64,
    /// maximum fraction of bankroll.
    pub cap: f64,
    pub bankroll: f64,
    pub min_edge_bps: f64,
    pub min_liquidity_usd: f64,
}

/// Computes the full `EdgeResult` for one contract: effective price,
/// edge, Kelly sizing, and the value-bet gate (§4.G).
pub fn compute_edge(
    q: f64,
    vwap: f64,
    best_ask: f64,
    fee_model: FeeModel,
    s_usd: f64,
    depth_usd: f64,
    kelly: KellyConfig,
) -> EdgeResult {
    let fee = fee_model.fee(s_usd);
    let fee_rate = if s_usd > 0.0 { fee / s_usd } else { 0.0 };
    let p_eff = vwap + fee_rate;

    let edge_raw = q - p_eff;
    let edge_bps = edge_raw * 10000.0;

    // Kelly for "pay p to win 1": f* = (q - p_eff) / (1 - p_eff).
    let kelly_frac = if p_eff >= 1.0 {
        0.0
    } else {
        ((q - p_eff) / (1.0 - p_eff)).max(0.0)
    };
    let kelly_capped = (kelly_frac * kelly.exponent).min(kelly.cap).max(0.0);
    let suggested_size = kelly.bankroll * kelly_capped;

    let is_value_bet =
        edge_bps >= kelly.min_edge_bps && suggested_size > 0.0 && depth_usd >= kelly.min_liquidity_usd;

    EdgeResult {
        q,
        price_eff: p_eff,
        edge_raw,
        edge_bps,
        kelly_frac,
        kelly_capped,
        suggested_size,
        is_value_bet,
        fee,
        slippage: vwap - best_ask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prob3_normalize_sums_to_one_within_tolerance() {
        let p = Prob3::new(0.79, 0.14, 0.07).normalize();
        assert!((p.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn blend_identity_when_model_equals_market() {
        let market = Prob3::new(0.5, 0.3, 0.2);
        let (blended, _) = v0_blend(market, market, MatchOutcome::Home, 0.3);
        assert!((blended.home - market.home).abs() < 1e-9);
        assert!((blended.draw - market.draw).abs() < 1e-9);
        assert!((blended.away - market.away).abs() < 1e-9);
    }

    #[test]
    fn temperature_one_is_identity() {
        let market = Prob3::new(0.6, 0.25, 0.15);
        let scaled = temperature_scale(market, 1.0);
        assert_eq!(scaled.home, market.home);
        assert_eq!(scaled.draw, market.draw);
        assert_eq!(scaled.away, market.away);
    }

    /// Scenario 3 from §8: edge calibration with agree-direction gate.
    #[test]
    fn agree_direction_gate_scenario() {
        let market = Prob3::new(0.79, 0.14, 0.07);
        let model = Prob3::new(0.61, 0.20, 0.19);
        let result = calibrate(
            market,
            Some(model),
            MatchOutcome::Home,
            CalibrationParams {
                mode: ModelMode::V0Blend,
                alpha: 0.10,
                temperature: 1.0,
            },
        )
        .unwrap();
        // model < market on home; if the raw blend would still exceed
        // market (edge on the long side) the gate neutralizes to market.
        if result.neutralized {
            assert!((result.q.home - market.home).abs() < 1e-9);
        } else {
            assert!(result.q.home >= 0.70 && result.q.home <= 0.79);
        }
    }

    /// Scenario 5 from §8: Kelly cap.
    #[test]
    fn kelly_cap_scenario() {
        let edge = compute_edge(
            0.90,
            0.40,
            0.40,
            FeeModel { fee_rate: 0.0 },
            1000.0,
            10_000.0,
            KellyConfig {
                exponent: 1.0,
                cap: 0.02,
                bankroll: 10_000.0,
                min_edge_bps: 0.0,
                min_liquidity_usd: 0.0,
            },
        );
        assert!((edge.kelly_frac - 0.8333333).abs() < 1e-4);
        assert!((edge.kelly_capped - 0.02).abs() < 1e-9);
        assert!((edge.suggested_size - 200.0).abs() < 1e-6);
    }

    #[test]
    fn incomplete_market_group_errors() {
        let result = calibrate(
            Prob3::new(0.0, 0.0, 0.0),
            None,
            MatchOutcome::Home,
            CalibrationParams::default(),
        );
        assert!(matches!(result, Err(TradingError::IncompleteMarketGroup(_))));
    }
}
