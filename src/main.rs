//! Daemon entrypoint: wires the orchestrator, paper engine, policy engine
//! and streaming hub together behind the HTTP surface (§6).
//!
//! Bootstrap sequence (`load_env` + `init_tracing` + component wiring,
//! then `axum::serve`) follows this crate's own prior `main.rs` shape —
//! dotenv search in cwd and parents, then `tracing_subscriber::registry()`
//! with an `EnvFilter` defaulting to `<crate>=debug,tower_http=debug`.

use anyhow::{Context, Result};
use clobtrader_backend::api::routes::router;
use clobtrader_backend::api::AppState;
use clobtrader_backend::config::Config;
use clobtrader_backend::market_source::RestMarketSource;
use clobtrader_backend::market_stream::{Streamer, StreamerChannels};
use clobtrader_backend::orchestrator::{Orchestrator, OrchestratorConfig};
use clobtrader_backend::orderbook::OrderBook;
use clobtrader_backend::paper_engine::PaperEngine;
use clobtrader_backend::policy::PolicyEngine;
use clobtrader_backend::streaming_hub::StreamingHub;
use clobtrader_backend::ws_transport::{TransportConfig, WsTransport};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("starting trading daemon");

    let config = Config::from_env();

    let engine = Arc::new(PaperEngine::new(config.initial_balance, config.paper_engine));
    let policy = Arc::new(PolicyEngine::new(config.policy));

    let gamma_tag = std::env::var("GAMMA_SPORTS_TAG").unwrap_or_else(|_| "soccer".to_string());
    let source = Arc::new(RestMarketSource::new(gamma_tag).context("building market source")?);

    let books: Arc<parking_lot::RwLock<HashMap<String, Arc<OrderBook>>>> =
        Arc::new(parking_lot::RwLock::new(HashMap::new()));
    let market_transport = spawn_market_stream(&config, books.clone());

    let (orchestrator, _rx) = Orchestrator::new(
        config.orchestrator,
        source,
        engine.clone(),
        policy.clone(),
        config.calibration,
        config.kelly,
        config.fee_model,
        books,
        Some(market_transport),
    );
    let orchestrator = Arc::new(orchestrator);

    let hub = Arc::new(StreamingHub::new(orchestrator.event_sender()));

    orchestrator.clone().spawn();

    let state = AppState {
        engine,
        policy,
        orchestrator,
        hub,
    };

    let app = router::<RestMarketSource>(state);

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "http server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Component C+D wiring: one `WsTransport` on the market channel, feeding
/// a `Streamer` whose decoded `BookEvent`s keep `books` (component B, one
/// per token id) live. §2 data flow: "C feeds D; D maintains B".
fn spawn_market_stream(
    config: &Config,
    books: Arc<parking_lot::RwLock<HashMap<String, Arc<OrderBook>>>>,
) -> Arc<WsTransport> {
    let transport = WsTransport::new(TransportConfig {
        url: config.market_ws_url.clone(),
        ..config.transport.clone()
    });

    let (_sub_id, mut raw_rx) = transport.subscribe(None, None, 1024);

    let (price_change_tx, mut price_change_rx) = tokio::sync::mpsc::channel(256);
    let (book_tx, mut book_rx) = tokio::sync::mpsc::channel(256);
    let (last_trade_price_tx, mut last_trade_price_rx) = tokio::sync::mpsc::channel(256);
    let (order_tx, mut order_rx) = tokio::sync::mpsc::channel(256);
    let (user_trade_tx, mut user_trade_rx) = tokio::sync::mpsc::channel(256);

    let streamer = Arc::new(Streamer::new(StreamerChannels {
        price_change: price_change_tx,
        book: book_tx,
        last_trade_price: last_trade_price_tx,
        order: order_tx,
        user_trade: user_trade_tx,
    }));

    tokio::spawn(async move {
        while let Some(bytes) = raw_rx.recv().await {
            streamer.decode_and_dispatch(&bytes).await;
        }
    });

    tokio::spawn(async move {
        while let Some(ev) = book_rx.recv().await {
            let book = {
                let mut guard = books.write();
                guard
                    .entry(ev.asset_id.clone())
                    .or_insert_with(|| Arc::new(OrderBook::new(ev.asset_id.clone(), ev.market.clone())))
                    .clone()
            };
            book.set_bids(ev.bids);
            book.set_asks(ev.asks);
        }
    });

    tokio::spawn(async move {
        while let Some(ev) = price_change_rx.recv().await {
            debug!(asset_id = %ev.asset_id, price = ?ev.price, "price change");
        }
    });
    tokio::spawn(async move {
        while let Some(ev) = last_trade_price_rx.recv().await {
            debug!(asset_id = %ev.asset_id, price = ?ev.price, "last trade price");
        }
    });
    tokio::spawn(async move {
        while let Some(ev) = order_rx.recv().await {
            debug!(id = %ev.id, status = %ev.status, "user order update");
        }
    });
    tokio::spawn(async move {
        while let Some(ev) = user_trade_rx.recv().await {
            debug!(id = %ev.id, market = %ev.market, "user trade");
        }
    });

    tokio::spawn(transport.clone().run());
    transport
}

fn load_env() {
    let _ = dotenv::dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let _ = dotenv::from_path(manifest_dir.join(".env"));
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clobtrader_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
