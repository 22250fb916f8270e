// Common test utilities and helpers
#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use ladder_grid_bot::core::LogNotifier;
use ladder_grid_bot::simulation::PaperExchange;
use ladder_grid_bot::{Database, PairMetadata, SessionConfig, SessionDeps, SessionTimings};

pub const PAIR: &str = "btc_twd";

/// 2 dp prices, 4 dp quantities
pub fn test_meta() -> PairMetadata {
    PairMetadata {
        pair: PAIR.to_string(),
        price_precision: 2,
        quantity_precision: 4,
        min_order_qty: Some(dec!(0.0001)),
        min_notional: None,
    }
}

/// Three orders a side, 1% apart
pub fn test_session_config() -> SessionConfig {
    SessionConfig {
        pair: PAIR.to_string(),
        order_size: dec!(0.01),
        step_up: dec!(0.01),
        step_down: dec!(0.01),
        trade_count: 3,
        reset_threshold: dec!(0.03),
        cancel_threshold: dec!(0.1),
    }
}

/// Millisecond timings. The volatility interval is long enough that no
/// check fires unless a test asks for it.
pub fn fast_timings() -> SessionTimings {
    SessionTimings {
        volatility_interval_ms: 60_000,
        reconnect_delay_ms: 20,
        max_reconnect_attempts: 3,
        connect_timeout_ms: 500,
        stop_timeout_ms: 2_000,
        keepalive_override_ms: None,
    }
}

pub fn timings_with_volatility(interval_ms: u64) -> SessionTimings {
    SessionTimings {
        volatility_interval_ms: interval_ms,
        ..fast_timings()
    }
}

/// Paper exchange, in-memory ledger and a log notifier wired together
pub struct Harness {
    pub exchange: Arc<PaperExchange>,
    pub db: Database,
    pub notifier: Arc<LogNotifier>,
    pub deps: SessionDeps,
}

pub fn harness(prices: Vec<Decimal>, timings: SessionTimings) -> Harness {
    harness_with(PaperExchange::new(test_meta(), prices), timings)
}

pub fn harness_with(exchange: PaperExchange, timings: SessionTimings) -> Harness {
    let exchange = Arc::new(exchange);
    let db = Database::new_in_memory().expect("Failed to create in-memory database");
    let notifier = Arc::new(LogNotifier::new(50));

    let deps = SessionDeps {
        exchange: exchange.clone(),
        connector: Arc::new(exchange.stream_connector()),
        trades: Arc::new(db.trade_store()),
        runs: Arc::new(db.session_run_store()),
        notifier: notifier.clone(),
        timings,
    };

    Harness {
        exchange,
        db,
        notifier,
        deps,
    }
}

/// Poll `check` every 10ms until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Synchronous variant of `wait_until`
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Create a temporary directory for test databases
pub fn create_temp_db_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");
    (temp_dir, db_path)
}
