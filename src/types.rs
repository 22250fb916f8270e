// Common types used across the application

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange-assigned order id. Opaque; BitoPro hands out numeric strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Map a BitoPro numeric status.
    ///
    /// -1 not triggered, 0 in progress, 1 partial, 2 filled,
    /// 3 partial then cancelled, 4 cancelled, 6 post-only cancelled.
    pub fn from_bitopro_code(code: i64) -> Option<Self> {
        match code {
            -1 | 0 => Some(OrderStatus::New),
            1 => Some(OrderStatus::PartiallyFilled),
            2 => Some(OrderStatus::Filled),
            3 | 4 => Some(OrderStatus::Canceled),
            6 => Some(OrderStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected)
    }
}

/// Authoritative order detail as returned by `get_order`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub pair: String,
    pub side: Side,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub avg_execution_price: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Price the fill actually happened at; falls back to the limit price
    /// when the exchange reports no average yet.
    pub fn fill_price(&self) -> Decimal {
        if self.avg_execution_price > Decimal::ZERO {
            self.avg_execution_price
        } else {
            self.price
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMetadata {
    pub pair: String,
    /// Decimal places allowed on prices
    pub price_precision: u32,
    /// Decimal places allowed on quantities
    pub quantity_precision: u32,
    pub min_order_qty: Option<Decimal>,
    pub min_notional: Option<Decimal>,
}

impl PairMetadata {
    pub fn quote_asset(&self) -> &str {
        split_pair(&self.pair).1
    }
}

/// `btc_twd` -> (`btc`, `twd`)
pub fn split_pair(pair: &str) -> (&str, &str) {
    pair.split_once('_').unwrap_or((pair, ""))
}

pub fn round_down(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
}

pub fn round_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::AwayFromZero)
}

pub fn is_rounded(value: Decimal, dp: u32) -> bool {
    round_down(value, dp) == value
}
