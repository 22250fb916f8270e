// Exchange seams: REST operations and the authenticated order stream
//
// The session actor only talks to these traits, so the live BitoPro client and
// the in-memory paper exchange are interchangeable.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::TradingResult;
use crate::types::{Order, OrderId, OrderStatus, PairMetadata, Side};

#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Place a limit order. `price` and `qty` must already be rounded to the
    /// pair's precision.
    async fn place_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        qty: Decimal,
    ) -> TradingResult<OrderId>;

    async fn cancel_order(&self, pair: &str, id: &OrderId) -> TradingResult<()>;

    /// Cancel every open order on the pair; returns the ids the exchange
    /// reported as cancelled.
    async fn cancel_all(&self, pair: &str) -> TradingResult<Vec<OrderId>>;

    async fn get_order(&self, pair: &str, id: &OrderId) -> TradingResult<Order>;

    /// Last traded price
    async fn get_price(&self, pair: &str) -> TradingResult<Decimal>;

    async fn get_pair_metadata(&self, pair: &str) -> TradingResult<PairMetadata>;

    /// Period at which `refresh_subscription` must be called, for exchanges
    /// whose user stream expires (listenKey style).
    fn keepalive_period(&self) -> Option<Duration> {
        None
    }

    async fn refresh_subscription(&self) -> TradingResult<()> {
        Ok(())
    }
}

/// Decoded order event. Only a hint: the actor re-fetches the order by id.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderHint {
    pub pair: String,
    pub order_id: OrderId,
    pub status_hint: Option<OrderStatus>,
}

#[async_trait]
pub trait StreamConnection: Send {
    /// Next hint from the stream. `None` means the peer closed the
    /// connection; `Some(Err(_))` a transport failure. Either way the
    /// connection is finished.
    async fn next_hint(&mut self) -> Option<TradingResult<OrderHint>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> TradingResult<Box<dyn StreamConnection>>;
}
