// Per-run trading parameters

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{TradingError, TradingResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lowercase `base_quote`, e.g. `btc_twd`
    pub pair: String,
    pub order_size: Decimal,
    /// Sell ladder spacing as a fraction of the reference price
    pub step_up: Decimal,
    /// Buy ladder spacing as a fraction of the reference price
    pub step_down: Decimal,
    /// Orders per side
    pub trade_count: u32,
    pub reset_threshold: Decimal,
    pub cancel_threshold: Decimal,
}

/// Fields `update` may change. The pair is fixed for the life of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfigPatch {
    pub order_size: Option<Decimal>,
    pub step_up: Option<Decimal>,
    pub step_down: Option<Decimal>,
    pub trade_count: Option<u32>,
    pub reset_threshold: Option<Decimal>,
    pub cancel_threshold: Option<Decimal>,
}

impl SessionConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == SessionConfigPatch::default()
    }
}

impl SessionConfig {
    pub fn validate(&self) -> TradingResult<()> {
        if !is_valid_pair(&self.pair) {
            return Err(invalid(
                "pair",
                format!("'{}' must be lowercase base_quote, e.g. btc_twd", self.pair),
            ));
        }

        if self.order_size <= Decimal::ZERO {
            return Err(invalid("order_size", "must be positive"));
        }

        for (name, step) in [("step_up", self.step_up), ("step_down", self.step_down)] {
            if step <= Decimal::ZERO || step >= Decimal::ONE {
                return Err(invalid(name, format!("{} must be between 0 and 1 exclusive", step)));
            }
        }

        if self.trade_count == 0 {
            return Err(invalid("trade_count", "must be at least 1"));
        }

        if self.reset_threshold <= Decimal::ZERO {
            return Err(invalid("reset_threshold", "must be positive"));
        }

        if self.cancel_threshold <= Decimal::ZERO {
            return Err(invalid("cancel_threshold", "must be positive"));
        }

        if self.reset_threshold >= self.cancel_threshold {
            return Err(TradingError::ConfigValidation(format!(
                "reset_threshold ({}) must be lower than cancel_threshold ({})",
                self.reset_threshold, self.cancel_threshold
            )));
        }

        Ok(())
    }

    /// Apply a patch and validate the result. `self` is untouched on error.
    pub fn merged(&self, patch: &SessionConfigPatch) -> TradingResult<SessionConfig> {
        let merged = SessionConfig {
            pair: self.pair.clone(),
            order_size: patch.order_size.unwrap_or(self.order_size),
            step_up: patch.step_up.unwrap_or(self.step_up),
            step_down: patch.step_down.unwrap_or(self.step_down),
            trade_count: patch.trade_count.unwrap_or(self.trade_count),
            reset_threshold: patch.reset_threshold.unwrap_or(self.reset_threshold),
            cancel_threshold: patch.cancel_threshold.unwrap_or(self.cancel_threshold),
        };
        merged.validate()?;
        Ok(merged)
    }
}

fn invalid(param: &str, reason: impl Into<String>) -> TradingError {
    TradingError::InvalidParameter(param.to_string(), reason.into())
}

fn is_valid_pair(pair: &str) -> bool {
    let Some((base, quote)) = pair.split_once('_') else {
        return false;
    };
    let part_ok = |s: &str| {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    };
    part_ok(base) && part_ok(quote)
}
