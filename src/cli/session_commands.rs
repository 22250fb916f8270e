// Session command: run one grid session until Ctrl-C or until it halts

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use ladder_grid_bot::core::notifier;
use ladder_grid_bot::simulation::PaperExchange;
use ladder_grid_bot::{
    AppConfig, BitoProClient, BitoProStreamConnector, Database, ExchangeApi, SessionDeps,
    SessionRegistry, SessionReport, SessionSnapshot, StreamConnector, TradeLedger, TradingError,
    TradingResult,
};

use crate::RunArgs;

pub async fn run_session(args: RunArgs, config: AppConfig) -> TradingResult<()> {
    let session_config = args.session_config();
    session_config.validate()?;

    let live = BitoProClient::new(&config.exchange)?;

    let (deps, db) = if args.dry_run {
        info!("🧪 DRY RUN mode (paper trading against live BitoPro prices)");
        let meta = live.get_pair_metadata(&session_config.pair).await?;
        info!(
            "📐 {}: price {} dp, quantity {} dp, min qty {:?}",
            meta.pair, meta.price_precision, meta.quantity_precision, meta.min_order_qty
        );

        let feed: Arc<dyn ExchangeApi> = Arc::new(live);
        let paper = PaperExchange::new(meta, std::iter::empty())
            .with_price_feed(feed)
            .with_fee_rate(dec!(0.002)) // BitoPro taker rate
            .with_auto_match(true);
        let connector: Arc<dyn StreamConnector> = Arc::new(paper.stream_connector());

        // Paper fills never touch the real ledger
        let db = Database::new_in_memory()?;
        (build_deps(&config, &db, Arc::new(paper), connector), db)
    } else {
        config.validate_credentials()?;
        info!("🚀 LIVE TRADING on BitoPro");
        warn!("⚠️  Real money!");

        let connector: Arc<dyn StreamConnector> =
            Arc::new(BitoProStreamConnector::new(&config.exchange, live.nonce_source()));
        let db = Database::new(&config.database.path)?;
        info!("🗄️ Ledger: {}", config.database.path);
        (build_deps(&config, &db, Arc::new(live), connector), db)
    };

    info!(
        "⚙️  {} | size {} | up {}% | down {}% | {} per side | reset {}% | cancel {}%",
        session_config.pair,
        session_config.order_size,
        session_config.step_up * Decimal::ONE_HUNDRED,
        session_config.step_down * Decimal::ONE_HUNDRED,
        session_config.trade_count,
        session_config.reset_threshold * Decimal::ONE_HUNDRED,
        session_config.cancel_threshold * Decimal::ONE_HUNDRED,
    );

    let pair = session_config.pair.clone();
    let registry = SessionRegistry::new(deps.clone());
    let handle = registry
        .start(session_config)
        .await
        .map_err(TradingError::SessionFailed)?;
    info!("✅ Session {} started. Press Ctrl-C to stop", handle);

    let mut status = tokio::time::interval(Duration::from_secs(args.status_every.max(1)));
    status.tick().await;

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Ctrl-C received, stopping session...");
                break registry.stop(&handle).await.map_err(TradingError::SessionFailed);
            }
            _ = status.tick() => {
                match registry.get_state(&handle).await {
                    SessionReport::Running(snapshot) => log_snapshot(&snapshot),
                    SessionReport::NotRunning => {
                        let reason = last_run_error(&deps)
                            .unwrap_or_else(|| "session ended unexpectedly".to_string());
                        error!("❌ Session is no longer running: {}", reason);
                        break Err(TradingError::SessionFailed(reason));
                    }
                }
            }
        }
    };

    summarize_ledger(&db, &pair);
    if outcome.is_ok() {
        info!("✅ Session stopped, all orders cancelled");
    }
    outcome
}

fn build_deps(
    config: &AppConfig,
    db: &Database,
    exchange: Arc<dyn ExchangeApi>,
    connector: Arc<dyn StreamConnector>,
) -> SessionDeps {
    SessionDeps {
        exchange,
        connector,
        trades: Arc::new(db.trade_store()),
        runs: Arc::new(db.session_run_store()),
        notifier: notifier::from_config(&config.notify),
        timings: config.session.clone(),
    }
}

fn log_snapshot(s: &SessionSnapshot) {
    info!(
        "📊 {} | origin {} | last {} | {} buys / {} sells open | stream {:?}",
        s.pair,
        display_price(s.origin_price),
        display_price(s.last_traded_price),
        s.open_buys,
        s.open_sells,
        s.stream_state,
    );
    if let Some(last) = s.errors.last() {
        warn!("⚠️  {} recorded errors, latest: {}", s.errors.len(), last);
    }
}

fn display_price(price: Option<Decimal>) -> String {
    price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}

fn last_run_error(deps: &SessionDeps) -> Option<String> {
    deps.runs
        .list_recent(1)
        .ok()?
        .into_iter()
        .next()
        .and_then(|run| run.error_message)
}

fn summarize_ledger(db: &Database, pair: &str) {
    let ledger = TradeLedger::new(Arc::new(db.trade_store()));
    match ledger.fifo_report(pair) {
        Ok(report) => {
            info!("💰 Realized profit: {} (matched {})", report.realized_profit, report.matched_quantity);
            info!("📦 Open lots: {}", report.open_lots.len());
            if !report.unmatched_sells.is_empty() {
                warn!("⚠️  {} sells could not be matched to buys", report.unmatched_sells.len());
            }
        }
        Err(e) => warn!("⚠️  Could not read the ledger: {}", e),
    }
}
