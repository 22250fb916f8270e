// Integration tests for database operations

mod common;

use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;

use ladder_grid_bot::db::{RunStatus, SessionRunStore, TradeStore, UpsertOutcome};
use ladder_grid_bot::{Database, SessionRun, Side, TradeRecord};
use common::create_temp_db_dir;

fn record(id: &str, run_id: Option<&str>, side: Side) -> TradeRecord {
    TradeRecord {
        id: id.to_string(),
        run_id: run_id.map(str::to_string),
        pair: "btc_twd".to_string(),
        side,
        quantity: dec!(0.01),
        price: dec!(2050000),
        fee: dec!(41),
        fee_currency: "twd".to_string(),
        settled_at: Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap(),
        filled: true,
    }
}

#[test]
fn test_database_creation() {
    let (_temp_dir, db_path) = create_temp_db_dir();

    let db = Database::new(&db_path);
    assert!(db.is_ok(), "Database creation should succeed");
    assert!(db.unwrap().health_check().unwrap());
}

#[test]
fn test_database_creates_missing_directories() {
    let (temp_dir, _) = create_temp_db_dir();
    let nested = temp_dir.path().join("data").join("ledger").join("bot.db");

    Database::new(&nested).expect("Failed to create nested database");
    assert!(nested.exists());
}

#[test]
fn test_records_and_runs_persist() {
    let (_temp_dir, db_path) = create_temp_db_dir();

    {
        let db = Database::new(&db_path).expect("Failed to create database");
        let run = SessionRun::new("run-1", "btc_twd", r#"{"pair":"btc_twd"}"#.to_string(), Utc::now());
        db.session_run_store().record_start(&run).unwrap();
        db.trade_store().upsert(&record("100", Some("run-1"), Side::Buy)).unwrap();
        db.session_run_store()
            .record_end("run-1", RunStatus::Stopped, Utc::now(), None)
            .unwrap();
    }

    let db = Database::new(&db_path).expect("Failed to reopen database");
    let stored = db.trade_store().get("100").unwrap().expect("record should persist");
    assert_eq!(stored, record("100", Some("run-1"), Side::Buy));

    let runs = db.session_run_store().list_recent(5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Stopped);
    assert_eq!(runs[0].config, r#"{"pair":"btc_twd"}"#);
}

#[test]
fn test_record_requires_known_run() {
    let db = Database::new_in_memory().unwrap();
    let result = db.trade_store().upsert(&record("1", Some("no-such-run"), Side::Sell));
    assert!(result.is_err(), "run_id must reference a recorded run");

    let outcome = db.trade_store().upsert(&record("1", None, Side::Sell)).unwrap();
    assert_eq!(outcome, UpsertOutcome::Inserted);
}

#[test]
fn test_recent_runs_are_newest_first() {
    let db = Database::new_in_memory().unwrap();
    let store = db.session_run_store();

    for (i, id) in ["old", "middle", "new"].iter().enumerate() {
        let started = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).single().unwrap();
        store
            .record_start(&SessionRun::new(*id, "btc_twd", "{}".to_string(), started))
            .unwrap();
    }
    store
        .record_config("new", r#"{"trade_count":5}"#)
        .unwrap();

    let runs = store.list_recent(2).unwrap();
    let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "middle"]);
    assert_eq!(runs[0].config, r#"{"trade_count":5}"#);
    assert_eq!(runs[0].status, RunStatus::Running);
}
