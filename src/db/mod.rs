//! Database module for SQLite-based trade ledger and session run history

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{TradingError, TradingResult};

pub mod session_run;
pub mod trade_record;

pub use session_run::{RunStatus, SessionRun, SessionRunStore, SqliteSessionRunStore};
pub use trade_record::{SqliteTradeStore, TradeRecord, TradeStore, UpsertOutcome};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("src/db/migrations");
}

/// Database manager around a single shared connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date
    pub fn new<P: AsRef<Path>>(path: P) -> TradingResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing and dry runs)
    pub fn new_in_memory() -> TradingResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> TradingResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run migrations to set up or update the schema
    pub fn run_migrations(&self) -> TradingResult<()> {
        let mut conn = lock(&self.conn)?;
        let report = embedded::migrations::runner().run(&mut *conn)?;
        for migration in report.applied_migrations() {
            tracing::info!("🗄️ Applied migration {}", migration);
        }
        Ok(())
    }

    /// Get a handle to the connection (for custom queries)
    pub fn get_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub fn trade_store(&self) -> SqliteTradeStore {
        SqliteTradeStore::new(self.get_connection())
    }

    pub fn session_run_store(&self) -> SqliteSessionRunStore {
        SqliteSessionRunStore::new(self.get_connection())
    }

    /// Check database health
    pub fn health_check(&self) -> TradingResult<bool> {
        let conn = lock(&self.conn)?;
        let result: i32 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(result == 1)
    }
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> TradingResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| TradingError::DatabaseQuery("database connection mutex poisoned".to_string()))
}
