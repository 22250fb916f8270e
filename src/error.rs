//! Unified error handling for the ladder grid bot
//!
//! Every component returns `TradingResult<T>`. The session actor looks at
//! `TradingError::kind()` to decide between recording a non-fatal message and
//! tearing the whole session down.

use std::io;

use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the grid trading bot
#[derive(Debug, Error)]
pub enum TradingError {
    // Configuration errors
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    #[error("Invalid parameter '{0}': {1}")]
    InvalidParameter(String, String),

    // Database errors
    #[error("Database query error: {0}")]
    DatabaseQuery(String),

    #[error("Database migration error: {0}")]
    DatabaseMigration(String),

    // API errors
    #[error("API connection error: {0}")]
    ApiConnection(String),

    #[error("API timeout: {0}")]
    ApiTimeout(String),

    #[error("API responded with HTTP {status}: {body}")]
    ApiResponse { status: u16, body: String },

    #[error("API payload could not be decoded: {0}")]
    ApiDecode(String),

    #[error("Request signing failed: {0}")]
    Signature(String),

    // Trading errors
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Price {price} is not rounded to {precision} decimal places")]
    UnroundedPrice { price: Decimal, precision: u32 },

    #[error("Quantity {quantity} is not rounded to {precision} decimal places")]
    UnroundedQuantity { quantity: Decimal, precision: u32 },

    #[error("No ladder orders could be placed: {0}")]
    NoOrdersPlaced(String),

    #[error("Bulk cancel failed: {0}")]
    CancelFailed(String),

    // Streaming errors
    #[error("Stream connection error: {0}")]
    StreamConnection(String),

    #[error("Stream did not connect within {0:?}")]
    StartTimeout(std::time::Duration),

    #[error("Stream reconnect budget exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    // Ledger errors
    #[error("Ledger inconsistency for {pair}: sell {sell_id} has {unmatched} unmatched quantity")]
    LedgerInconsistency {
        pair: String,
        sell_id: String,
        unmatched: Decimal,
    },

    // Session lifecycle errors
    #[error("A trading session is already running")]
    SessionActive,

    #[error("No trading session is running")]
    SessionNotRunning,

    #[error("Unknown session handle: {0}")]
    UnknownSession(String),

    #[error("Trading session failed: {0}")]
    SessionFailed(String),

    // General errors
    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the session actor should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O hiccup; the caller decides whether to retry
    Transient,
    /// Bad input, rejected before any state change
    Validation,
    /// The exchange refused a single request; recorded and aggregated
    ExchangeRejection,
    /// The session cannot continue and must be torn down
    Fatal,
}

impl TradingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TradingError::ApiConnection(_)
            | TradingError::ApiTimeout(_)
            | TradingError::StreamConnection(_)
            | TradingError::Io(_) => ErrorKind::Transient,

            TradingError::ConfigNotFound(_)
            | TradingError::ConfigParse(_)
            | TradingError::ConfigValidation(_)
            | TradingError::InvalidParameter(_, _)
            | TradingError::SessionActive
            | TradingError::SessionNotRunning
            | TradingError::UnknownSession(_) => ErrorKind::Validation,

            TradingError::ApiResponse { .. }
            | TradingError::ApiDecode(_)
            | TradingError::OrderRejected(_)
            | TradingError::CancelFailed(_)
            | TradingError::LedgerInconsistency { .. }
            | TradingError::DatabaseQuery(_) => ErrorKind::ExchangeRejection,

            TradingError::NoOrdersPlaced(_)
            | TradingError::StartTimeout(_)
            | TradingError::ReconnectExhausted(_)
            | TradingError::UnroundedPrice { .. }
            | TradingError::UnroundedQuantity { .. }
            | TradingError::Signature(_)
            | TradingError::DatabaseMigration(_)
            | TradingError::SessionFailed(_)
            | TradingError::Internal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Worth another attempt later; logged with every recorded error
    pub fn is_retryable(&self) -> bool {
        match self {
            TradingError::ApiResponse { status, .. } => *status == 429 || *status >= 500,
            other => other.kind() == ErrorKind::Transient,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TradingError::ConfigNotFound(_)
            | TradingError::ConfigParse(_)
            | TradingError::ConfigValidation(_)
            | TradingError::InvalidParameter(_, _) => "config",

            TradingError::DatabaseQuery(_) | TradingError::DatabaseMigration(_) => "database",

            TradingError::ApiConnection(_)
            | TradingError::ApiTimeout(_)
            | TradingError::ApiResponse { .. }
            | TradingError::ApiDecode(_)
            | TradingError::Signature(_) => "api",

            TradingError::OrderRejected(_)
            | TradingError::UnroundedPrice { .. }
            | TradingError::UnroundedQuantity { .. }
            | TradingError::NoOrdersPlaced(_)
            | TradingError::CancelFailed(_) => "trading",

            TradingError::StreamConnection(_)
            | TradingError::StartTimeout(_)
            | TradingError::ReconnectExhausted(_) => "stream",

            TradingError::LedgerInconsistency { .. } => "ledger",

            TradingError::SessionActive
            | TradingError::SessionNotRunning
            | TradingError::UnknownSession(_)
            | TradingError::SessionFailed(_) => "session",

            TradingError::Io(_) | TradingError::Internal(_) => "internal",
        }
    }

    /// Get a user-friendly error message with helpful context
    pub fn user_message(&self) -> String {
        match self {
            TradingError::ConfigNotFound(path) => format!(
                "Configuration file not found: {}\n\n\
                 💡 Quick fix:\n\
                 1. Run: grid-bot init\n\
                 2. Edit config.toml with your BitoPro API key, secret and account email\n\
                 3. Try again",
                path
            ),
            TradingError::ApiResponse { status: 401, body } => format!(
                "API authentication failed: {}\n\n\
                 💡 Check:\n\
                 - API key and secret are correct\n\
                 - The identity matches the account email\n\
                 - Keys have trading permissions",
                body
            ),
            TradingError::LedgerInconsistency { pair, sell_id, unmatched } => format!(
                "Trade ledger for {} is inconsistent: sell {} sold {} more than was bought\n\n\
                 💡 Sells placed outside this bot, or fills that were never recorded, \
                 break FIFO matching",
                pair, sell_id, unmatched
            ),
            _ => self.to_string(),
        }
    }
}

// Conversion implementations for common error types

impl From<io::Error> for TradingError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => TradingError::ConfigNotFound(err.to_string()),
            io::ErrorKind::TimedOut => TradingError::ApiTimeout(err.to_string()),
            _ => TradingError::Io(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for TradingError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => {
                TradingError::DatabaseQuery("Query returned no rows".to_string())
            }
            _ => TradingError::DatabaseQuery(err.to_string()),
        }
    }
}

impl From<refinery::Error> for TradingError {
    fn from(err: refinery::Error) -> Self {
        TradingError::DatabaseMigration(err.to_string())
    }
}

impl From<serde_json::Error> for TradingError {
    fn from(err: serde_json::Error) -> Self {
        TradingError::ApiDecode(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for TradingError {
    fn from(err: toml::de::Error) -> Self {
        TradingError::ConfigParse(format!("TOML parse error: {}", err))
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TradingError::ApiTimeout(err.to_string())
        } else if err.is_decode() {
            TradingError::ApiDecode(err.to_string())
        } else {
            TradingError::ApiConnection(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TradingError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TradingError::StreamConnection(err.to_string())
    }
}

impl From<crate::config::ConfigError> for TradingError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::FileNotFound(path) => TradingError::ConfigNotFound(path),
            ConfigError::FileRead(msg) | ConfigError::FileWrite(msg) => TradingError::Io(msg),
            ConfigError::Parse(msg) | ConfigError::Serialize(msg) => TradingError::ConfigParse(msg),
            ConfigError::Validation(msg) => TradingError::ConfigValidation(msg),
        }
    }
}

/// Result type alias using TradingError
pub type TradingResult<T> = Result<T, TradingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_display() {
        let err = TradingError::ApiResponse { status: 400, body: "{\"error\":\"bad\"}".to_string() };
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(TradingError::ApiTimeout("t".into()).kind(), ErrorKind::Transient);
        assert_eq!(TradingError::ConfigValidation("c".into()).kind(), ErrorKind::Validation);
        assert_eq!(TradingError::OrderRejected("r".into()).kind(), ErrorKind::ExchangeRejection);
        assert_eq!(TradingError::ReconnectExhausted(3).kind(), ErrorKind::Fatal);
        assert!(TradingError::UnroundedPrice { price: dec!(1.234), precision: 2 }.is_fatal());
    }

    #[test]
    fn test_retryable() {
        assert!(TradingError::ApiTimeout("test".to_string()).is_retryable());
        assert!(TradingError::ApiResponse { status: 503, body: String::new() }.is_retryable());
        assert!(!TradingError::ApiResponse { status: 400, body: String::new() }.is_retryable());
        assert!(!TradingError::ConfigNotFound("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(TradingError::StartTimeout(std::time::Duration::from_secs(5)).category(), "stream");
        assert_eq!(TradingError::DatabaseQuery("q".into()).category(), "database");
        assert_eq!(TradingError::SessionActive.category(), "session");
    }

    #[test]
    fn test_user_message() {
        let err = TradingError::LedgerInconsistency {
            pair: "btc_twd".to_string(),
            sell_id: "42".to_string(),
            unmatched: dec!(0.5),
        };
        let msg = err.user_message();
        assert!(msg.contains("btc_twd"));
        assert!(msg.contains("0.5"));
        assert!(msg.contains("💡"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "test");
        let trading_err: TradingError = io_err.into();
        assert!(matches!(trading_err, TradingError::ConfigNotFound(_)));
    }
}
