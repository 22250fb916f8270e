// Integration tests for the trade ledger on SQLite

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use ladder_grid_bot::core::OpenLot;
use ladder_grid_bot::db::{SessionRun, SessionRunStore, UpsertOutcome};
use ladder_grid_bot::{Database, Order, OrderId, OrderStatus, Side, TradeLedger, TradingError};

use common::create_temp_db_dir;

fn order(id: &str, side: Side, qty: Decimal, price: Decimal, status: OrderStatus, at_ms: i64) -> Order {
    Order {
        id: OrderId::from(id),
        pair: "btc_twd".to_string(),
        side,
        price,
        orig_qty: qty,
        executed_qty: qty,
        avg_execution_price: price,
        fee: Decimal::ZERO,
        fee_currency: "twd".to_string(),
        status,
        updated_at: Utc.timestamp_millis_opt(at_ms).single().unwrap(),
    }
}

fn filled(id: &str, side: Side, qty: Decimal, price: Decimal, at_ms: i64) -> Order {
    order(id, side, qty, price, OrderStatus::Filled, at_ms)
}

fn ledger(db: &Database) -> TradeLedger {
    TradeLedger::new(Arc::new(db.trade_store()))
}

#[test]
fn test_partial_fill_then_complete_then_duplicate() {
    let db = Database::new_in_memory().unwrap();
    let ledger = ledger(&db);

    let mut partial = order("1", Side::Buy, dec!(0.5), dec!(100), OrderStatus::PartiallyFilled, 1_000);
    partial.orig_qty = dec!(1);
    assert_eq!(ledger.record_fill(&partial, None).unwrap(), Some(UpsertOutcome::Inserted));

    let complete = filled("1", Side::Buy, dec!(1), dec!(100), 2_000);
    assert_eq!(ledger.record_fill(&complete, None).unwrap(), Some(UpsertOutcome::Updated));

    // Replayed delivery of the final state
    let mut replay = complete.clone();
    replay.executed_qty = dec!(0.75);
    assert_eq!(ledger.record_fill(&replay, None).unwrap(), Some(UpsertOutcome::Frozen));

    let position = ledger.compute_open_position("btc_twd").unwrap();
    assert_eq!(position.total_bought, dec!(1));
}

#[test]
fn test_unexecuted_order_is_not_recorded() {
    let db = Database::new_in_memory().unwrap();
    let ledger = ledger(&db);

    let mut resting = order("9", Side::Sell, dec!(1), dec!(105), OrderStatus::New, 0);
    resting.executed_qty = Decimal::ZERO;
    assert_eq!(ledger.record_fill(&resting, None).unwrap(), None);

    let mut cancelled = resting.clone();
    cancelled.status = OrderStatus::Canceled;
    assert_eq!(ledger.record_fill(&cancelled, None).unwrap(), None);
}

#[test]
fn test_fifo_profit_and_open_position() {
    let db = Database::new_in_memory().unwrap();
    let ledger = ledger(&db);

    ledger.record_fill(&filled("b1", Side::Buy, dec!(1), dec!(100), 1_000), None).unwrap();
    ledger.record_fill(&filled("b2", Side::Buy, dec!(1), dec!(110), 2_000), None).unwrap();
    ledger.record_fill(&filled("s1", Side::Sell, dec!(1.5), dec!(120), 3_000), None).unwrap();

    assert_eq!(ledger.compute_realized_profit("btc_twd").unwrap(), dec!(25));

    let position = ledger.compute_open_position("btc_twd").unwrap();
    assert_eq!(position.total_bought, dec!(2));
    assert_eq!(position.total_sold, dec!(1.5));
    assert_eq!(position.net_quantity, dec!(0.5));
    assert_eq!(
        position.open_lots,
        vec![OpenLot {
            buy_id: "b2".to_string(),
            quantity: dec!(0.5),
            price: dec!(110)
        }]
    );
}

#[test]
fn test_settlement_time_decides_fifo_order() {
    let db = Database::new_in_memory().unwrap();
    let ledger = ledger(&db);

    // Inserted out of order; b-late settled after b-early
    ledger.record_fill(&filled("b-late", Side::Buy, dec!(1), dec!(90), 5_000), None).unwrap();
    ledger.record_fill(&filled("b-early", Side::Buy, dec!(1), dec!(80), 1_000), None).unwrap();
    ledger.record_fill(&filled("s1", Side::Sell, dec!(1), dec!(100), 6_000), None).unwrap();

    assert_eq!(ledger.compute_realized_profit("btc_twd").unwrap(), dec!(20));
    let report = ledger.fifo_report("btc_twd").unwrap();
    assert_eq!(report.open_lots[0].buy_id, "b-late");
}

#[test]
fn test_sell_settled_before_buy_still_matches() {
    let db = Database::new_in_memory().unwrap();
    let ledger = ledger(&db);

    // Matching is by quantity in settlement order, not by which came first
    ledger.record_fill(&filled("s1", Side::Sell, dec!(1), dec!(105), 1_000), None).unwrap();
    ledger.record_fill(&filled("b1", Side::Buy, dec!(1), dec!(100), 2_000), None).unwrap();

    assert_eq!(ledger.compute_realized_profit("btc_twd").unwrap(), dec!(5));
    assert!(ledger.compute_open_position("btc_twd").unwrap().open_lots.is_empty());
}

#[test]
fn test_quote_and_base_fees_reduce_profit() {
    let db = Database::new_in_memory().unwrap();
    let ledger = ledger(&db);

    let mut buy = filled("b1", Side::Buy, dec!(1), dec!(100), 1_000);
    buy.fee = dec!(0.001);
    buy.fee_currency = "btc".to_string();
    let mut sell = filled("s1", Side::Sell, dec!(1), dec!(110), 2_000);
    sell.fee = dec!(0.22);
    ledger.record_fill(&buy, None).unwrap();
    ledger.record_fill(&sell, None).unwrap();

    // 10 gross, 0.1 buy fee converted at 100, 0.22 sell fee
    let report = ledger.fifo_report("btc_twd").unwrap();
    assert_eq!(report.matched_fees, dec!(0.32));
    assert_eq!(report.realized_profit, dec!(9.68));
}

#[test]
fn test_oversold_history_is_inconsistent() {
    let db = Database::new_in_memory().unwrap();
    let ledger = ledger(&db);

    ledger.record_fill(&filled("b1", Side::Buy, dec!(1), dec!(100), 1_000), None).unwrap();
    ledger.record_fill(&filled("s1", Side::Sell, dec!(1.25), dec!(120), 2_000), None).unwrap();

    match ledger.compute_realized_profit("btc_twd") {
        Err(TradingError::LedgerInconsistency { sell_id, unmatched, .. }) => {
            assert_eq!(sell_id, "s1");
            assert_eq!(unmatched, dec!(0.25));
        }
        other => panic!("expected a ledger inconsistency, got {:?}", other),
    }

    // The report still carries what did match
    let report = ledger.fifo_report("btc_twd").unwrap();
    assert_eq!(report.realized_profit, dec!(20));
}

#[test]
fn test_pairs_are_isolated() {
    let db = Database::new_in_memory().unwrap();
    let ledger = ledger(&db);

    ledger.record_fill(&filled("b1", Side::Buy, dec!(1), dec!(100), 1_000), None).unwrap();
    let mut eth = filled("e1", Side::Sell, dec!(3), dec!(50), 2_000);
    eth.pair = "eth_twd".to_string();
    ledger.record_fill(&eth, None).unwrap();

    assert_eq!(ledger.compute_realized_profit("btc_twd").unwrap(), Decimal::ZERO);
    assert!(ledger.compute_realized_profit("eth_twd").is_err());
    assert_eq!(ledger.compute_open_position("btc_twd").unwrap().net_quantity, dec!(1));
}

#[test]
fn test_ledger_survives_reopen() {
    let (_temp_dir, db_path) = create_temp_db_dir();

    {
        let db = Database::new(&db_path).expect("Failed to create database");
        let run = SessionRun::new("run-1", "btc_twd", "{}".to_string(), Utc::now());
        db.session_run_store().record_start(&run).unwrap();

        let ledger = ledger(&db);
        ledger.record_fill(&filled("b1", Side::Buy, dec!(1), dec!(100), 1_000), Some("run-1")).unwrap();
        ledger.record_fill(&filled("s1", Side::Sell, dec!(1), dec!(101.5), 2_000), Some("run-1")).unwrap();
    }

    let db = Database::new(&db_path).expect("Failed to reopen database");
    assert_eq!(ledger(&db).compute_realized_profit("btc_twd").unwrap(), dec!(1.5));
}
