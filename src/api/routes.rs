//! Route handlers and router assembly for the `health, status, markets,
//! signals, account, stats, policy, ws` surface (§6).

use super::AppState;
use crate::orchestrator::MarketSource;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router<S: MarketSource + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status::<S>))
        .route("/markets", get(markets::<S>))
        .route("/signals", get(signals::<S>))
        .route("/account", get(account::<S>))
        .route("/stats", get(stats::<S>))
        .route("/policy", get(policy::<S>))
        .route("/ws", get(crate::streaming_hub::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    tracked_markets: usize,
    open_orders: usize,
    balance: f64,
}

async fn status<S: MarketSource + 'static>(
    State(state): State<AppState<S>>,
) -> Json<StatusResponse> {
    let account = state.engine.account_snapshot();
    Json(StatusResponse {
        tracked_markets: state.orchestrator.tracked_count(),
        open_orders: account.open_orders.len(),
        balance: crate::decimal::decimal_to_f64(account.balance),
    })
}

#[derive(Debug, Serialize)]
struct MarketsResponse {
    markets: Vec<crate::model::Contract>,
}

async fn markets<S: MarketSource + 'static>(
    State(state): State<AppState<S>>,
) -> Json<MarketsResponse> {
    Json(MarketsResponse {
        markets: state.orchestrator.tracked_snapshot(),
    })
}

#[derive(Debug, Serialize)]
struct SignalsResponse {
    signals: Vec<serde_json::Value>,
}

/// The orchestrator's broadcast channel is the source of truth for
/// live signal flow (consumed via `/ws`); this endpoint always returns
/// an empty backlog rather than replaying from a side-channel store,
/// since none is specified.
async fn signals<S: MarketSource + 'static>(
    State(_state): State<AppState<S>>,
) -> Json<SignalsResponse> {
    Json(SignalsResponse { signals: Vec::new() })
}

async fn account<S: MarketSource + 'static>(
    State(state): State<AppState<S>>,
) -> Json<crate::model::Account> {
    Json(state.engine.account_snapshot())
}

async fn stats<S: MarketSource + 'static>(
    State(state): State<AppState<S>>,
) -> Json<crate::paper_engine::ExecutionStats> {
    Json(state.engine.stats())
}

#[derive(Debug, Serialize)]
struct PolicyResponse {
    daily_orders: u32,
    daily_volume: f64,
    daily_loss: f64,
}

async fn policy<S: MarketSource + 'static>(
    State(state): State<AppState<S>>,
) -> Json<PolicyResponse> {
    let (orders, volume, loss) = state.policy.daily_snapshot();
    Json(PolicyResponse {
        daily_orders: orders,
        daily_volume: crate::decimal::decimal_to_f64(volume),
        daily_loss: crate::decimal::decimal_to_f64(loss),
    })
}
