//! Trade record persistence
//!
//! One row per exchange order id. Partial fills refresh the row until the
//! order completes; after that it never changes.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use super::lock;
use crate::error::{TradingError, TradingResult};
use crate::types::{Order, OrderStatus, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Exchange order id
    pub id: String,
    pub run_id: Option<String>,
    pub pair: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub settled_at: DateTime<Utc>,
    pub filled: bool,
}

impl TradeRecord {
    /// Build a record from an order with a non-zero executed quantity
    pub fn from_order(order: &Order, run_id: Option<&str>) -> Option<Self> {
        if order.executed_qty <= Decimal::ZERO {
            return None;
        }
        Some(TradeRecord {
            id: order.id.to_string(),
            run_id: run_id.map(str::to_string),
            pair: order.pair.clone(),
            side: order.side,
            quantity: order.executed_qty,
            price: order.fill_price(),
            fee: order.fee,
            fee_currency: order.fee_currency.clone(),
            settled_at: order.updated_at,
            filled: order.status == OrderStatus::Filled,
        })
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let side: String = row.get(3)?;
        let settled_ms: i64 = row.get(8)?;
        Ok(TradeRecord {
            id: row.get(0)?,
            run_id: row.get(1)?,
            pair: row.get(2)?,
            side: Side::from_string(&side).ok_or_else(|| conversion_error(3, &side))?,
            quantity: decimal_column(row, 4)?,
            price: decimal_column(row, 5)?,
            fee: decimal_column(row, 6)?,
            fee_currency: row.get(7)?,
            settled_at: Utc
                .timestamp_millis_opt(settled_ms)
                .single()
                .ok_or_else(|| conversion_error(8, &settled_ms.to_string()))?,
            filled: row.get::<_, i64>(9)? != 0,
        })
    }
}

fn decimal_column(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|_| conversion_error(idx, &text))
}

fn conversion_error(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Row already marked filled; nothing written
    Frozen,
}

pub trait TradeStore: Send + Sync {
    fn upsert(&self, record: &TradeRecord) -> TradingResult<UpsertOutcome>;

    /// Records of one side, oldest settlement first (ties by id)
    fn list(&self, pair: &str, side: Side) -> TradingResult<Vec<TradeRecord>>;

    fn get(&self, id: &str) -> TradingResult<Option<TradeRecord>>;
}

const SELECT_COLUMNS: &str = "SELECT id, run_id, pair, side, quantity, price, fee, fee_currency, settled_at, filled
     FROM trade_records";

#[derive(Clone)]
pub struct SqliteTradeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTradeStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

impl TradeStore for SqliteTradeStore {
    fn upsert(&self, record: &TradeRecord) -> TradingResult<UpsertOutcome> {
        let conn = lock(&self.conn)?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT filled FROM trade_records WHERE id = ?1",
                params![record.id],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(filled) if filled != 0 => return Ok(UpsertOutcome::Frozen),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };

        conn.execute(
            "INSERT INTO trade_records (
                id, run_id, pair, side, quantity, price, fee, fee_currency, settled_at, filled
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                quantity = excluded.quantity,
                price = excluded.price,
                fee = excluded.fee,
                fee_currency = excluded.fee_currency,
                settled_at = excluded.settled_at,
                filled = excluded.filled
            WHERE trade_records.filled = 0",
            params![
                record.id,
                record.run_id,
                record.pair,
                record.side.to_string(),
                record.quantity.to_string(),
                record.price.to_string(),
                record.fee.to_string(),
                record.fee_currency,
                record.settled_at.timestamp_millis(),
                record.filled as i64,
            ],
        )?;

        Ok(outcome)
    }

    fn list(&self, pair: &str, side: Side) -> TradingResult<Vec<TradeRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE pair = ?1 AND side = ?2 ORDER BY settled_at ASC, id ASC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![pair, side.to_string()], |row| TradeRecord::from_row(row))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(TradingError::from)
    }

    fn get(&self, id: &str) -> TradingResult<Option<TradeRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;
        let record = stmt
            .query_row(params![id], |row| TradeRecord::from_row(row))
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use rust_decimal_macros::dec;

    fn record(id: &str, qty: Decimal, filled: bool) -> TradeRecord {
        TradeRecord {
            id: id.to_string(),
            run_id: None,
            pair: "btc_twd".to_string(),
            side: Side::Buy,
            quantity: qty,
            price: dec!(100),
            fee: dec!(0.1),
            fee_currency: "twd".to_string(),
            settled_at: Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap(),
            filled,
        }
    }

    #[test]
    fn test_partial_then_filled_then_frozen() {
        let db = Database::new_in_memory().unwrap();
        let store = db.trade_store();

        assert_eq!(store.upsert(&record("1", dec!(0.2), false)).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&record("1", dec!(0.5), true)).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.upsert(&record("1", dec!(0.9), true)).unwrap(), UpsertOutcome::Frozen);

        let stored = store.get("1").unwrap().unwrap();
        assert_eq!(stored.quantity, dec!(0.5));
        assert!(stored.filled);
    }

    #[test]
    fn test_list_orders_by_settlement_then_id() {
        let db = Database::new_in_memory().unwrap();
        let store = db.trade_store();

        let mut late = record("a", dec!(1), true);
        late.settled_at = late.settled_at + chrono::Duration::seconds(10);
        store.upsert(&late).unwrap();
        store.upsert(&record("c", dec!(1), true)).unwrap();
        store.upsert(&record("b", dec!(1), true)).unwrap();

        let ids: Vec<String> = store
            .list("btc_twd", Side::Buy)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert!(store.list("btc_twd", Side::Sell).unwrap().is_empty());
    }
}
