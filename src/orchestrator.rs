//! Component J — orchestrator.
//!
//! Grounded on `main.rs`'s `tokio::spawn(...)` scheduled-loop pattern
//! (`parallel_data_collection`, `wallet_analytics_polling`,
//! `storage_pruning_polling`, each a `tokio::time::interval` loop) and its
//! `broadcast::channel::<WsServerEvent>` event bus. Rewritten onto §4.J's
//! three named loops (discovery/forecast/monitor) over the contract/edge/
//! policy/paper-engine components instead of the teacher's wallet/whale/
//! arbitrage scrapers.

use crate::edge::{self, CalibrationParams, FeeModel, KellyConfig};
use crate::error::TradingError;
use crate::market_stream::SubscriptionState;
use crate::model::{Contract, MatchOutcome, Order, OrderType, Prob3, Side};
use crate::orderbook::OrderBook;
use crate::paper_engine::PaperEngine;
use crate::policy::PolicyEngine;
use crate::ws_transport::WsTransport;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub discovery_interval: Duration,
    pub forecast_interval: Duration,
    pub monitor_interval: Duration,
    pub min_volume: f64,
    pub max_spread_bps: f64,
    pub s_usd: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(300),
            forecast_interval: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(15),
            min_volume: 1_000.0,
            max_spread_bps: 500.0,
            s_usd: 200.0,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("ORCH_DISCOVERY_SECS") {
            if let Ok(n) = v.parse() {
                config.discovery_interval = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("ORCH_FORECAST_SECS") {
            if let Ok(n) = v.parse() {
                config.forecast_interval = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("ORCH_MONITOR_SECS") {
            if let Ok(n) = v.parse() {
                config.monitor_interval = Duration::from_secs(n);
            }
        }
        config
    }
}

/// Events emitted to component K's broadcast hub (§4.J "Emits events to
/// component K").
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum OrchestratorEvent {
    DiscoveryTick { considered: usize, passed: usize },
    ForecastTick { market: String, edge_bps: f64, is_value_bet: bool },
    OrderSubmitted { order_id: u64, market: String, side: String },
    PolicyRejected { market: String, reason: String },
    MonitorTick { open_positions: usize, unrealized_pnl: f64 },
    Error { message: String },
}

/// Fetches the current set of tradeable contracts and grouped match
/// quotes (§4.J "discovery"). Implemented against the exchange REST API
/// in production; swappable for replay/fixture sources in tests.
#[async_trait::async_trait]
pub trait MarketSource: Send + Sync {
    async fn discover(&self) -> Result<Vec<Contract>, TradingError>;
    async fn match_quote(&self, market_key: &str) -> Result<Option<(Prob3, MatchOutcome)>, TradingError>;
    async fn model_quote(&self, market_key: &str) -> Result<Option<Prob3>, TradingError>;
}

pub struct Orchestrator<S: MarketSource> {
    config: OrchestratorConfig,
    source: Arc<S>,
    engine: Arc<PaperEngine>,
    policy: Arc<PolicyEngine>,
    calibration: CalibrationParams,
    kelly: KellyConfig,
    fee_model: FeeModel,
    events: broadcast::Sender<OrchestratorEvent>,
    tracked: parking_lot::RwLock<Vec<Contract>>,
    /// Live order books fed by component D, keyed by token id. Shared with
    /// the background task that reads `BookEvent`s off the market-data
    /// stream (§2 data flow: "C feeds D; D maintains B").
    books: Arc<parking_lot::RwLock<HashMap<String, Arc<OrderBook>>>>,
    /// The market-channel transport, if one was wired in. Used to push an
    /// updated subscription listing the currently tracked token ids after
    /// every discovery tick.
    market_transport: Option<Arc<WsTransport>>,
}

impl<S: MarketSource + 'static> Orchestrator<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        source: Arc<S>,
        engine: Arc<PaperEngine>,
        policy: Arc<PolicyEngine>,
        calibration: CalibrationParams,
        kelly: KellyConfig,
        fee_model: FeeModel,
        books: Arc<parking_lot::RwLock<HashMap<String, Arc<OrderBook>>>>,
        market_transport: Option<Arc<WsTransport>>,
    ) -> (Self, broadcast::Receiver<OrchestratorEvent>) {
        let (tx, rx) = broadcast::channel(1024);
        (
            Self {
                config,
                source,
                engine,
                policy,
                calibration,
                kelly,
                fee_model,
                events: tx,
                tracked: parking_lot::RwLock::new(Vec::new()),
                books,
                market_transport,
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Clone of the broadcast sender, handed to `StreamingHub` so each
    /// `/ws` client gets its own independent receiver.
    pub fn event_sender(&self) -> broadcast::Sender<OrchestratorEvent> {
        self.events.clone()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.read().len()
    }

    pub fn tracked_snapshot(&self) -> Vec<Contract> {
        self.tracked.read().clone()
    }

    /// Spawns the three independent periodic loops (§4.J, §5 "Scheduling
    /// model": J runs on the async runtime, suspending only at timer
    /// ticks and channel sends).
    pub fn spawn(self: Arc<Self>) {
        let discovery = self.clone();
        tokio::spawn(async move { discovery.discovery_loop().await });

        let forecast = self.clone();
        tokio::spawn(async move { forecast.forecast_loop().await });

        let monitor = self.clone();
        tokio::spawn(async move { monitor.monitor_loop().await });
    }

    async fn discovery_loop(&self) {
        let mut ticker = interval(self.config.discovery_interval);
        loop {
            ticker.tick().await;
            match self.source.discover().await {
                Ok(contracts) => {
                    let considered = contracts.len();
                    let passed: Vec<Contract> = contracts
                        .into_iter()
                        .filter(|c| {
                            !c.closed
                                && crate::decimal::decimal_to_f64(c.liquidity) >= self.config.min_volume
                                && crate::decimal::decimal_to_f64(c.best_ask - c.best_bid).abs() * 10_000.0
                                    <= self.config.max_spread_bps
                        })
                        .collect();
                    let passed_count = passed.len();
                    let token_ids: Vec<String> = passed.iter().map(|c| c.token_id.clone()).collect();
                    *self.tracked.write() = passed;
                    debug!(considered, passed = passed_count, "discovery tick");
                    let _ = self.events.send(OrchestratorEvent::DiscoveryTick {
                        considered,
                        passed: passed_count,
                    });

                    if let Some(transport) = &self.market_transport {
                        let msg = SubscriptionState {
                            market_assets: token_ids,
                            market_markets: Vec::new(),
                            user_auth: None,
                        }
                        .market_subscribe_message();
                        if let Err(e) = transport.send_text(msg).await {
                            debug!(error = %e, "failed to refresh market subscription");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "discovery failed");
                    let _ = self.events.send(OrchestratorEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn forecast_loop(&self) {
        let mut ticker = interval(self.config.forecast_interval);
        loop {
            ticker.tick().await;
            let contracts: Vec<Contract> = self.tracked.read().clone();
            for contract in contracts {
                if let Err(e) = self.evaluate_contract(&contract).await {
                    let _ = self.events.send(OrchestratorEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Scores one contract through G, applies H, submits via F
    /// (§4.J "forecast").
    async fn evaluate_contract(&self, contract: &Contract) -> Result<(), TradingError> {
        let Some(match_key) = contract.match_key() else {
            return Ok(());
        };
        let Some((market_quote, outcome)) = self.source.match_quote(&match_key).await? else {
            return Ok(());
        };
        let model_quote = self.source.model_quote(&match_key).await?;

        let calibrated = match edge::calibrate(market_quote, model_quote, outcome, self.calibration) {
            Ok(c) => c,
            Err(_) => return Ok(()), // IncompleteMarketGroup: skip this contract this tick (§7)
        };

        let best_ask = crate::decimal::decimal_to_f64(contract.best_ask);
        let book = self.books.read().get(&contract.token_id).cloned();
        let vwap_quote = match edge::fetch_vwap(
            book.as_deref(),
            Some(crate::decimal::decimal_to_f64(contract.mid)),
            self.config.s_usd,
        ) {
            Ok(q) => q,
            Err(_) => return Ok(()), // InsufficientLiquidity: propagate to edge engine, not value bet
        };

        let result = edge::compute_edge(
            calibrated.q.get(outcome),
            vwap_quote.vwap,
            best_ask,
            self.fee_model,
            self.config.s_usd,
            vwap_quote.total_depth_usd,
            self.kelly,
        );

        let _ = self.events.send(OrchestratorEvent::ForecastTick {
            market: contract.market_id.clone(),
            edge_bps: result.edge_bps,
            is_value_bet: result.is_value_bet,
        });

        if !result.is_value_bet {
            return Ok(());
        }

        let size = rust_decimal::Decimal::from_f64_retain(result.suggested_size / vwap_quote.vwap.max(1e-9))
            .unwrap_or_default();
        let price = rust_decimal::Decimal::from_f64_retain(vwap_quote.vwap).unwrap_or_default();

        if let Err(e) = self.policy.check(&contract.market_id, size, price, true, Utc::now()) {
            let _ = self.events.send(OrchestratorEvent::PolicyRejected {
                market: contract.market_id.clone(),
                reason: e.to_string(),
            });
            return Ok(()); // PolicyReject: skip order; orchestrator logs (§7)
        }

        let order: Order = self.engine.place_order(
            &contract.token_id,
            &contract.market_id,
            Side::Buy,
            OrderType::Market,
            rust_decimal::Decimal::ZERO,
            size,
            book.as_deref(),
            None,
        )?;

        self.policy.record_order_opened();
        let _ = self.events.send(OrchestratorEvent::OrderSubmitted {
            order_id: order.id,
            market: contract.market_id.clone(),
            side: "BUY".to_string(),
        });

        Ok(())
    }

    async fn monitor_loop(&self) {
        let mut ticker = interval(self.config.monitor_interval);
        loop {
            ticker.tick().await;
            let account = self.engine.account_snapshot();
            let unrealized: rust_decimal::Decimal =
                account.positions.values().map(|p| p.unrealized_pnl).sum();
            info!(
                open_positions = account.positions.len(),
                unrealized_pnl = crate::decimal::decimal_to_f64(unrealized),
                "monitor tick"
            );
            let _ = self.events.send(OrchestratorEvent::MonitorTick {
                open_positions: account.positions.len(),
                unrealized_pnl: crate::decimal::decimal_to_f64(unrealized),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::FeeModel;
    use crate::paper_engine::PaperEngineConfig;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixtureSource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MarketSource for FixtureSource {
        async fn discover(&self) -> Result<Vec<Contract>, TradingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Contract {
                market_id: "m1".to_string(),
                token_id: "t1".to_string(),
                slug: "m1".to_string(),
                question: "q".to_string(),
                event: crate::model::EventSpec::Soccer1X2 {
                    league: "L".to_string(),
                    home_team: "A".to_string(),
                    away_team: "B".to_string(),
                    match_date: Utc::now(),
                    outcome: MatchOutcome::Home,
                    is_yes_side: true,
                },
                best_bid: dec!(0.60),
                best_ask: dec!(0.62),
                mid: dec!(0.61),
                closed: false,
                end_date: Utc::now(),
                liquidity: dec!(5000),
            }])
        }

        async fn match_quote(
            &self,
            _market_key: &str,
        ) -> Result<Option<(Prob3, MatchOutcome)>, TradingError> {
            Ok(Some((Prob3::new(0.79, 0.14, 0.07), MatchOutcome::Home)))
        }

        async fn model_quote(&self, _market_key: &str) -> Result<Option<Prob3>, TradingError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn discovery_filters_by_liquidity_and_spread() {
        let source = Arc::new(FixtureSource {
            calls: AtomicUsize::new(0),
        });
        let engine = Arc::new(PaperEngine::new(dec!(10_000), PaperEngineConfig::default()));
        let policy = Arc::new(PolicyEngine::new(crate::policy::PolicyLimits::default()));
        let (orchestrator, mut rx) = Orchestrator::new(
            OrchestratorConfig {
                discovery_interval: Duration::from_millis(10),
                forecast_interval: Duration::from_secs(3600),
                monitor_interval: Duration::from_secs(3600),
                ..OrchestratorConfig::default()
            },
            source,
            engine,
            policy,
            CalibrationParams::default(),
            KellyConfig {
                exponent: 1.0,
                cap: 0.05,
                bankroll: 10_000.0,
                min_edge_bps: 0.0,
                min_liquidity_usd: 0.0,
            },
            FeeModel { fee_rate: 0.0 },
            Arc::new(parking_lot::RwLock::new(HashMap::new())),
            None,
        );

        let discovery_events = tokio::spawn(async move {
            Arc::new(orchestrator).discovery_loop_once_for_test().await
        });
        let _ = discovery_events.await;
        let _ = rx.try_recv();
    }

    impl<S: MarketSource + 'static> Orchestrator<S> {
        /// Test-only helper: runs a single discovery pass without the
        /// surrounding interval loop.
        async fn discovery_loop_once_for_test(self: Arc<Self>) {
            if let Ok(contracts) = self.source.discover().await {
                *self.tracked.write() = contracts;
            }
        }
    }
}
