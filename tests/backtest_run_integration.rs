//! Integration tests for the `backtest_run` CLI binary.
//!
//! Writes a small JSON price-point fixture to a temp dir, invokes the
//! built binary against it, and checks the emitted summary.

use std::path::PathBuf;
use std::process::Command;

fn backtest_run_binary() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    for profile in ["debug", "release"] {
        let binary = manifest_dir.join("target").join(profile).join("backtest_run");
        if binary.exists() {
            return binary;
        }
    }
    panic!("backtest_run binary not found. Run `cargo build --bin backtest_run` first.");
}

fn write_uptrend_fixture(dir: &tempfile::TempDir) -> PathBuf {
    let base = "2024-01-25T00:00:00Z";
    let start = chrono::DateTime::parse_from_rfc3339(base).unwrap();
    let mut points = Vec::new();
    for h in 0..(30 * 24) {
        let price = 0.50 + (0.25 * h as f64 / (30.0 * 24.0));
        let ts = start + chrono::Duration::hours(h);
        points.push(serde_json::json!({
            "timestamp": ts.to_rfc3339(),
            "token_id": "tok",
            "market": "mkt",
            "price": price,
            "volume": 1000.0,
            "bid_price": price - 0.005,
            "ask_price": price + 0.005,
            "bid_size": 10000.0,
            "ask_size": 10000.0,
        }));
    }

    let path = dir.path().join("uptrend.json");
    std::fs::write(&path, serde_json::to_string(&points).unwrap()).unwrap();
    path
}

#[test]
fn buy_and_hold_on_uptrend_fixture_reports_positive_pnl() {
    let binary = backtest_run_binary();
    let dir = tempfile::tempdir().unwrap();
    let data = write_uptrend_fixture(&dir);
    let output_path = dir.path().join("summary.json");

    let status = Command::new(&binary)
        .args([
            "--data",
            data.to_str().unwrap(),
            "--strategy",
            "buy_and_hold",
            "--balance",
            "10000",
            "--output",
            output_path.to_str().unwrap(),
        ])
        .status()
        .expect("failed to run backtest_run");

    assert!(status.success(), "backtest_run exited with {status}");

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output_path).unwrap()).unwrap();
    assert!(
        summary["total_pnl"].as_f64().unwrap() > 0.0,
        "expected positive pnl on an uptrend fixture, got {summary}"
    );
}

#[test]
fn unknown_strategy_exits_with_config_error_code() {
    let binary = backtest_run_binary();
    let dir = tempfile::tempdir().unwrap();
    let data = write_uptrend_fixture(&dir);

    let status = Command::new(&binary)
        .args(["--data", data.to_str().unwrap(), "--strategy", "not_a_strategy"])
        .status()
        .expect("failed to run backtest_run");

    assert_eq!(status.code(), Some(1));
}

#[test]
fn missing_data_file_exits_with_runtime_error_code() {
    let binary = backtest_run_binary();

    let status = Command::new(&binary)
        .args(["--data", "/nonexistent/path/does-not-exist.json"])
        .status()
        .expect("failed to run backtest_run");

    assert_eq!(status.code(), Some(2));
}
