//! Session run history

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::lock;
use crate::error::{TradingError, TradingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    /// Stopped by the operator
    Stopped,
    /// Stopped by the volatility guard or a lost stream
    Halted,
    /// Never reached running, or died on a fatal error
    Failed,
}

impl RunStatus {
    pub fn to_string(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Stopped => "STOPPED",
            RunStatus::Halted => "HALTED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "STOPPED" => RunStatus::Stopped,
            "HALTED" => RunStatus::Halted,
            "FAILED" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRun {
    pub id: String,
    pub pair: String,
    /// Session config as JSON
    pub config: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

impl SessionRun {
    pub fn new(id: impl Into<String>, pair: impl Into<String>, config: String, started_at: DateTime<Utc>) -> Self {
        SessionRun {
            id: id.into(),
            pair: pair.into(),
            config,
            started_at,
            ended_at: None,
            status: RunStatus::Running,
            error_message: None,
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SessionRun {
            id: row.get(0)?,
            pair: row.get(1)?,
            config: row.get(2)?,
            started_at: parse_ts(row, 3)?,
            ended_at: match row.get::<_, Option<String>>(4)? {
                Some(_) => Some(parse_ts(row, 4)?),
                None => None,
            },
            status: RunStatus::from_string(&row.get::<_, String>(5)?),
            error_message: row.get(6)?,
        })
    }
}

fn parse_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

pub trait SessionRunStore: Send + Sync {
    fn record_start(&self, run: &SessionRun) -> TradingResult<()>;

    /// Update the config of a running session after `update`
    fn record_config(&self, id: &str, config: &str) -> TradingResult<()>;

    fn record_end(
        &self,
        id: &str,
        status: RunStatus,
        ended_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> TradingResult<()>;

    /// Most recent first
    fn list_recent(&self, limit: usize) -> TradingResult<Vec<SessionRun>>;
}

#[derive(Clone)]
pub struct SqliteSessionRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionRunStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

impl SessionRunStore for SqliteSessionRunStore {
    fn record_start(&self, run: &SessionRun) -> TradingResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO session_runs (id, pair, config, started_at, ended_at, status, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.id,
                run.pair,
                run.config,
                run.started_at.to_rfc3339(),
                run.ended_at.map(|t| t.to_rfc3339()),
                run.status.to_string(),
                run.error_message,
            ],
        )?;
        Ok(())
    }

    fn record_config(&self, id: &str, config: &str) -> TradingResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute("UPDATE session_runs SET config = ?1 WHERE id = ?2", params![config, id])?;
        Ok(())
    }

    fn record_end(
        &self,
        id: &str,
        status: RunStatus,
        ended_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> TradingResult<()> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE session_runs SET ended_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![ended_at.to_rfc3339(), status.to_string(), error, id],
        )?;
        if changed == 0 {
            return Err(TradingError::DatabaseQuery(format!("session run {} not found", id)));
        }
        Ok(())
    }

    fn list_recent(&self, limit: usize) -> TradingResult<Vec<SessionRun>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, pair, config, started_at, ended_at, status, error_message
             FROM session_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| SessionRun::from_row(row))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(TradingError::from)
    }
}
