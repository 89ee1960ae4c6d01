//! Ambient configuration (AS-3). One `Config::from_env()` aggregating
//! each subsystem's own `from_env()`, in the same dotenv +
//! `env::var(...).ok()...parse()...unwrap_or(default)` idiom as the
//! teacher's `models.rs::Config::from_env()`.

use crate::edge::{CalibrationParams, FeeModel, KellyConfig, ModelMode};
use crate::model::{ExecutionMode, SlippageModel};
use crate::orchestrator::OrchestratorConfig;
use crate::paper_engine::{FeeConfig, PaperEngineConfig};
use crate::policy::PolicyLimits;
use crate::ws_transport::TransportConfig;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub initial_balance: Decimal,
    pub paper_engine: PaperEngineConfig,
    pub policy: PolicyLimits,
    pub calibration: CalibrationParams,
    pub kelly: KellyConfig,
    pub fee_model: FeeModel,
    pub orchestrator: OrchestratorConfig,
    pub market_ws_url: String,
    pub user_ws_url: String,
    pub transport: TransportConfig,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let http_port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let initial_balance = std::env::var("INITIAL_BALANCE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::from(10_000));

        let mode = match std::env::var("EXECUTION_MODE").as_deref() {
            Ok("realistic") | Ok("REALISTIC") => ExecutionMode::Realistic,
            _ => ExecutionMode::Simple,
        };
        let slippage_model = match std::env::var("SLIPPAGE_MODEL").as_deref() {
            Ok("fixed") => SlippageModel::Fixed,
            Ok("linear") => SlippageModel::Linear,
            Ok("sqrt_root") => SlippageModel::SqrtRoot,
            Ok("orderbook") => SlippageModel::Orderbook,
            _ => SlippageModel::None,
        };
        let maker_bps = std::env::var("MAKER_FEE_BPS")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ZERO);
        let taker_bps = std::env::var("TAKER_FEE_BPS")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ZERO);

        let calibration_mode = match std::env::var("CALIBRATION_MODE").as_deref() {
            Ok("mathshard") => ModelMode::Mathshard,
            Ok("v0blend") => ModelMode::V0Blend,
            Ok("v1") => ModelMode::V1,
            _ => ModelMode::V0,
        };
        let alpha = std::env::var("CALIBRATION_ALPHA")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.10);
        let temperature = std::env::var("CALIBRATION_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1.046);

        let kelly = KellyConfig {
            exponent: std::env::var("KELLY_EXPONENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.25),
            cap: std::env::var("KELLY_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.05),
            bankroll: std::env::var("INITIAL_BALANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000.0),
            min_edge_bps: std::env::var("MIN_EDGE_BPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50.0),
            min_liquidity_usd: std::env::var("MIN_LIQUIDITY_USD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500.0),
        };

        let fee_rate = std::env::var("FEE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);

        Self {
            http_port,
            initial_balance,
            paper_engine: PaperEngineConfig {
                mode,
                slippage_model,
                fee: FeeConfig {
                    maker_bps,
                    taker_bps,
                },
            },
            policy: PolicyLimits::from_env(),
            calibration: CalibrationParams {
                mode: calibration_mode,
                alpha,
                temperature,
            },
            kelly,
            fee_model: FeeModel { fee_rate },
            orchestrator: OrchestratorConfig::from_env(),
            market_ws_url: std::env::var("POLYMARKET_MARKET_WS_URL")
                .unwrap_or_else(|_| "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()),
            user_ws_url: std::env::var("POLYMARKET_USER_WS_URL")
                .unwrap_or_else(|_| "wss://ws-subscriptions-clob.polymarket.com/ws/user".to_string()),
            transport: TransportConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_has_sane_defaults_without_any_env_vars() {
        let config = Config::from_env();
        assert!(config.http_port > 0);
        assert!(config.initial_balance > Decimal::ZERO);
        assert!(config.kelly.cap > 0.0 && config.kelly.cap <= 1.0);
    }
}
