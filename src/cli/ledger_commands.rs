// Ledger and run-history commands
use std::sync::Arc;

use tracing::{info, warn};

use ladder_grid_bot::db::SessionRunStore;
use ladder_grid_bot::{AppConfig, Database, TradeLedger, TradingError, TradingResult};

fn open_ledger(config: &AppConfig) -> TradingResult<(Database, TradeLedger)> {
    let db = Database::new(&config.database.path)?;
    let ledger = TradeLedger::new(Arc::new(db.trade_store()));
    Ok((db, ledger))
}

pub fn show_profit(config: &AppConfig, pair: &str) -> TradingResult<()> {
    let (_db, ledger) = open_ledger(config)?;
    let report = ledger.fifo_report(pair)?;

    info!("💰 Realized profit for {}", pair);
    info!("   Profit:           {}", report.realized_profit);
    info!("   Matched quantity: {}", report.matched_quantity);
    info!("   Matched fees:     {}", report.matched_fees);
    info!("   Open lots:        {}", report.open_lots.len());

    if let Some(first) = report.unmatched_sells.first() {
        for sell in &report.unmatched_sells {
            warn!("⚠️  Sell {} has {} unmatched", sell.sell_id, sell.quantity);
        }
        return Err(TradingError::LedgerInconsistency {
            pair: pair.to_string(),
            sell_id: first.sell_id.clone(),
            unmatched: first.quantity,
        });
    }
    Ok(())
}

pub fn show_position(config: &AppConfig, pair: &str) -> TradingResult<()> {
    let (_db, ledger) = open_ledger(config)?;
    let position = ledger.compute_open_position(pair)?;

    info!("📦 Position for {}", position.pair);
    info!("   Bought: {}", position.total_bought);
    info!("   Sold:   {}", position.total_sold);
    info!("   Net:    {}", position.net_quantity);

    if position.open_lots.is_empty() {
        info!("   No open lots");
    }
    for lot in &position.open_lots {
        info!("   • {} @ {} (buy {})", lot.quantity, lot.price, lot.buy_id);
    }
    Ok(())
}

pub fn show_runs(config: &AppConfig, limit: usize) -> TradingResult<()> {
    let db = Database::new(&config.database.path)?;
    let runs = db.session_run_store().list_recent(limit)?;

    if runs.is_empty() {
        info!("📭 No session runs recorded yet");
        return Ok(());
    }

    info!("📜 {} most recent runs", runs.len());
    for run in runs {
        let ended = run
            .ended_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        info!(
            "   {} | {} | {} | {} → {}",
            run.status.to_string(),
            run.pair,
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            ended
        );
        if let Some(msg) = run.error_message {
            info!("     ↳ {}", msg);
        }
    }
    Ok(())
}

/// Database and credential checks
pub fn show_status(config: &AppConfig) -> TradingResult<()> {
    info!("🔍 System status");

    let db = Database::new(&config.database.path)?;
    if db.health_check()? {
        info!("   ✅ Database: {}", config.database.path);
    }

    match config.validate_credentials() {
        Ok(()) => info!("   ✅ Credentials configured"),
        Err(e) => warn!("   ⚠️  {} (dry runs still work)", e),
    }

    match &config.notify.webhook_url {
        Some(url) => info!("   🔔 Webhook: {}", url),
        None => info!("   🔔 Notifications go to the log"),
    }
    Ok(())
}
