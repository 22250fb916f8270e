// Ladder Grid Trading Bot Library
//
// Keeps a symmetric ladder of limit orders on BitoPro, replaces fills,
// guards against volatility and keeps a FIFO trade ledger

pub mod core;
pub mod clients;
pub mod config;
pub mod db;          // SQLite trade ledger and run history
pub mod error;       // Unified error handling
pub mod logging;
pub mod simulation;  // Paper exchange for dry runs
pub mod types;

// Re-export session lifecycle types
pub use core::{
    SessionConfig, SessionConfigPatch, SessionDeps, SessionHandle, SessionRegistry,
    SessionReport, SessionSnapshot,
};

// Re-export ledger types
pub use core::{FifoReport, OpenPosition, TradeLedger};

// Re-export error types
pub use error::{ErrorKind, TradingError, TradingResult};

// Re-export client types
pub use clients::{BitoProClient, BitoProStreamConnector, ExchangeApi, StreamConnector};

// Re-export configuration
pub use config::{AppConfig, ConfigError, SessionTimings};

// Re-export database types
pub use db::{Database, SessionRun, TradeRecord};

// Re-export domain types
pub use types::{Order, OrderId, OrderStatus, PairMetadata, Side};
