//! Backtest runner CLI (§6: "a backtest driver taking
//! `(data, strategy, balance, maker-fee, taker-fee, output,
//! strategy-params…)` and emitting JSON or CSV summaries + trade list").
//!
//! Argument parsing follows `dataset_inspect.rs`'s `clap::Parser` style.
//!
//! Exit codes: 0 success, 1 config error, 2 runtime error, 130 canceled.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use clobtrader_backend::backtest::{
    synthetic_uptrend, BacktestSummary, Backtester, BuyAndHold, MomentumStrategy, Resolution,
    Strategy,
};
use clobtrader_backend::model::PricePoint;
use clobtrader_backend::paper_engine::{FeeConfig, PaperEngineConfig};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Runs a strategy over a recorded price history and reports P&L,
/// drawdown, and Sharpe.
#[derive(Parser, Debug)]
#[command(name = "backtest_run")]
#[command(about = "Run a trading strategy against recorded price-point history")]
struct Cli {
    /// Path to input data (.json or .csv). Omit to run a synthetic fixture.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Strategy name: buy_and_hold | momentum
    #[arg(long, default_value = "buy_and_hold")]
    strategy: String,

    /// Starting account balance
    #[arg(long, default_value_t = 10_000.0)]
    balance: f64,

    /// Maker fee in bps
    #[arg(long, default_value_t = 0.0)]
    maker_fee: f64,

    /// Taker fee in bps
    #[arg(long, default_value_t = 0.0)]
    taker_fee: f64,

    /// Output path (.json or .csv); stdout JSON summary if omitted
    #[arg(long)]
    output: Option<PathBuf>,

    /// Per-tick stake in USD for the chosen strategy
    #[arg(long, default_value_t = 500.0)]
    stake: f64,

    /// Moving-average window (momentum strategy only)
    #[arg(long, default_value_t = 10)]
    ma_window: usize,

    /// Breakout threshold, relative (momentum strategy only)
    #[arg(long, default_value_t = 0.02)]
    threshold: f64,
}

#[derive(Debug, Deserialize)]
struct JsonPoint {
    timestamp: DateTime<Utc>,
    token_id: String,
    market: String,
    price: f64,
    volume: f64,
    bid_price: Option<f64>,
    ask_price: Option<f64>,
    bid_size: Option<f64>,
    ask_size: Option<f64>,
}

impl JsonPoint {
    fn into_price_point(self) -> PricePoint {
        PricePoint {
            timestamp: self.timestamp,
            token_id: self.token_id,
            market: self.market,
            price: Decimal::from_f64(self.price).unwrap_or_default(),
            volume: Decimal::from_f64(self.volume).unwrap_or_default(),
            bid_price: self.bid_price.and_then(Decimal::from_f64),
            ask_price: self.ask_price.and_then(Decimal::from_f64),
            bid_size: self.bid_size.and_then(Decimal::from_f64),
            ask_size: self.ask_size.and_then(Decimal::from_f64),
        }
    }
}

fn load_points(path: &PathBuf) -> Result<Vec<PricePoint>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading data file {}", path.display()))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => {
            let mut reader = csv::Reader::from_reader(raw.as_bytes());
            let mut points = Vec::new();
            for record in reader.deserialize() {
                let point: JsonPoint = record.context("parsing CSV row")?;
                points.push(point.into_price_point());
            }
            Ok(points)
        }
        _ => {
            let points: Vec<JsonPoint> = serde_json::from_str(&raw)
                .or_else(|_| serde_json::from_str::<JsonPoint>(&raw).map(|p| vec![p]))
                .context("parsing JSON data file")?;
            Ok(points.into_iter().map(JsonPoint::into_price_point).collect())
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let points = match &cli.data {
        Some(path) => load_points(path)?,
        None => synthetic_uptrend(
            "tok",
            "mkt",
            Utc::now(),
            30,
            Decimal::new(50, 2),
            Decimal::new(75, 2),
        ),
    };

    if points.is_empty() {
        eprintln!("no price points to replay");
        return Ok(1);
    }

    let initial_balance = Decimal::from_f64(cli.balance).unwrap_or(Decimal::from(10_000));
    let config = PaperEngineConfig {
        fee: FeeConfig {
            maker_bps: Decimal::from_f64(cli.maker_fee).unwrap_or_default(),
            taker_bps: Decimal::from_f64(cli.taker_fee).unwrap_or_default(),
        },
        ..PaperEngineConfig::default()
    };

    let backtester = Backtester::new(initial_balance, config);
    let stake = Decimal::from_f64(cli.stake).unwrap_or(Decimal::from(500));

    let mut strategy: Box<dyn Strategy> = match cli.strategy.as_str() {
        "momentum" => Box::new(MomentumStrategy::new(cli.ma_window, cli.threshold, stake)),
        "buy_and_hold" => Box::new(BuyAndHold::new(stake)),
        other => {
            eprintln!("unknown strategy: {other} (expected buy_and_hold | momentum)");
            return Ok(1);
        }
    };

    let resolutions: Vec<Resolution> = {
        let mut seen = std::collections::HashSet::new();
        points
            .iter()
            .filter(|p| seen.insert(p.token_id.clone()))
            .map(|p| Resolution {
                token_id: p.token_id.clone(),
            })
            .collect()
    };

    let summary = backtester.run(points, strategy.as_mut(), &resolutions);

    write_output(&cli, &summary)?;
    Ok(0)
}

fn write_output(cli: &Cli, summary: &BacktestSummary) -> Result<()> {
    match &cli.output {
        Some(path) if path.extension().and_then(|e| e.to_str()) == Some("csv") => {
            let mut writer = csv::Writer::from_path(path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            writer.write_record(["timestamp", "equity"])?;
            for point in &summary.equity_curve {
                writer.write_record([point.timestamp.to_rfc3339(), point.equity.to_string()])?;
            }
            writer.flush()?;
        }
        Some(path) => {
            let json = serde_json::to_string_pretty(summary)?;
            let mut file =
                File::create(path).with_context(|| format!("creating output file {}", path.display()))?;
            file.write_all(json.as_bytes())?;
        }
        None => {
            let json = serde_json::to_string_pretty(summary)?;
            println!("{json}");
        }
    }

    eprintln!(
        "total_pnl={:.2} win_rate={:.2}% max_drawdown={:.2}% sharpe={:.3} trades={}",
        summary.total_pnl,
        summary.win_rate * 100.0,
        summary.max_drawdown * 100.0,
        summary.sharpe,
        summary.trade_count
    );

    Ok(())
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}
