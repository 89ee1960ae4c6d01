//! HTTP surface (§6): `health, status, markets, signals, account, stats,
//! policy, ws`. Handlers follow `api/simple.rs`'s axum extractor idiom
//! (`Query`/`State` extractors, plain `Json<T>` responses, `StatusCode`
//! errors) pared down to the trading-core `AppState` this crate carries
//! instead of the source signal/vault/wallet surface.

pub mod routes;

use crate::orchestrator::{MarketSource, Orchestrator};
use crate::paper_engine::PaperEngine;
use crate::policy::PolicyEngine;
use crate::streaming_hub::StreamingHub;
use std::sync::Arc;

/// Shared state handed to every handler via axum's `State` extractor.
/// Mirrors the teacher's `AppState` pattern: a flat bag of `Arc`s, cloned
/// cheaply per request.
#[derive(Clone)]
pub struct AppState<S: MarketSource> {
    pub engine: Arc<PaperEngine>,
    pub policy: Arc<PolicyEngine>,
    pub orchestrator: Arc<Orchestrator<S>>,
    pub hub: Arc<StreamingHub>,
}

impl<S: MarketSource> axum::extract::FromRef<AppState<S>> for Arc<StreamingHub> {
    fn from_ref(state: &AppState<S>) -> Self {
        state.hub.clone()
    }
}
