// Configuration management for the grid trading bot

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const ENV_API_KEY: &str = "BITOPRO_API_KEY";
pub const ENV_API_SECRET: &str = "BITOPRO_API_SECRET";
pub const ENV_IDENTITY: &str = "BITOPRO_IDENTITY";

const PLACEHOLDER_PREFIX: &str = "YOUR_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub api_secret: String,
    /// Account email, sent as `identity` in cancel and query payloads
    pub identity: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_rest_url() -> String {
    "https://api.bitopro.com/v3".to_string()
}

fn default_ws_url() -> String {
    "wss://stream.bitopro.com:443/ws/v1/pub/auth/orders".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

/// Timings of a trading session. Kept in milliseconds so tests can run a
/// whole session lifecycle in well under a second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimings {
    pub volatility_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    /// Overrides the keep-alive period reported by the exchange
    #[serde(default)]
    pub keepalive_override_ms: Option<u64>,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            volatility_interval_ms: 300_000, // 5 minutes
            reconnect_delay_ms: 5_000,
            max_reconnect_attempts: 3,
            connect_timeout_ms: 5_000,
            stop_timeout_ms: 10_000,
            keepalive_override_ms: None,
        }
    }
}

impl SessionTimings {
    pub fn volatility_interval(&self) -> Duration {
        Duration::from_millis(self.volatility_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn keepalive_override(&self) -> Option<Duration> {
        self.keepalive_override_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/grid_bot.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub session: SessionTimings,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig {
                api_key: "YOUR_BITOPRO_API_KEY".to_string(),
                api_secret: "YOUR_BITOPRO_API_SECRET".to_string(),
                identity: "YOUR_ACCOUNT_EMAIL".to_string(),
                rest_url: default_rest_url(),
                ws_url: default_ws_url(),
                request_timeout_secs: default_request_timeout(),
            },
            session: SessionTimings::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, apply env overrides, validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let mut config: AppConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::FileWrite(e.to_string()))?;
            }
        }

        fs::write(path, content)
            .map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Credentials from the environment win over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.exchange.api_key = key;
        }
        if let Ok(secret) = std::env::var(ENV_API_SECRET) {
            self.exchange.api_secret = secret;
        }
        if let Ok(identity) = std::env::var(ENV_IDENTITY) {
            self.exchange.identity = identity;
        }
    }

    /// Validate values that don't depend on the exchange
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_timings()?;

        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Validation("database.path must not be empty".to_string()));
        }

        if let Some(url) = &self.notify.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "notify.webhook_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }

        Ok(())
    }

    /// Stricter check for live trading: credentials must be real
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        let fields = [
            ("exchange.api_key", &self.exchange.api_key),
            ("exchange.api_secret", &self.exchange.api_secret),
            ("exchange.identity", &self.exchange.identity),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() || value.starts_with(PLACEHOLDER_PREFIX) {
                return Err(ConfigError::Validation(format!(
                    "{} is not set (edit config.toml or export {})",
                    name,
                    env_name_for(name)
                )));
            }
        }

        Ok(())
    }

    fn validate_timings(&self) -> Result<(), ConfigError> {
        let s = &self.session;
        let positive = [
            ("session.volatility_interval_ms", s.volatility_interval_ms),
            ("session.reconnect_delay_ms", s.reconnect_delay_ms),
            ("session.connect_timeout_ms", s.connect_timeout_ms),
            ("session.stop_timeout_ms", s.stop_timeout_ms),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be greater than 0", name)));
            }
        }

        if s.keepalive_override_ms == Some(0) {
            return Err(ConfigError::Validation(
                "session.keepalive_override_ms must be greater than 0".to_string(),
            ));
        }

        if self.exchange.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "exchange.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_name_for(field: &str) -> &'static str {
    match field {
        "exchange.api_key" => ENV_API_KEY,
        "exchange.api_secret" => ENV_API_SECRET,
        _ => ENV_IDENTITY,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid_but_has_placeholders() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.validate_credentials().is_err());
    }

    #[test]
    fn test_zero_timing_rejected() {
        let mut config = AppConfig::default();
        config.session.reconnect_delay_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_delay_ms"));
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let toml_str = r#"
            [exchange]
            api_key = "k"
            api_secret = "s"
            identity = "me@example.com"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.session.max_reconnect_attempts, 3);
        assert_eq!(config.session.volatility_interval(), Duration::from_secs(300));
        assert_eq!(config.exchange.rest_url, "https://api.bitopro.com/v3");
        assert!(config.validate_credentials().is_ok());
    }

    #[test]
    fn test_bad_webhook_rejected() {
        let mut config = AppConfig::default();
        config.notify.webhook_url = Some("ftp://nope".to_string());
        assert!(config.validate().is_err());
    }
}
