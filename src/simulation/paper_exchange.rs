// Paper exchange: an in-memory `ExchangeApi`
//
// Prices come from a scripted queue (the last price repeats) or from a live
// price feed. Orders rest until `fill` is called, or until the price crosses
// them when auto-matching is on.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::paper_stream::{PaperStreamConnector, StreamHub};
use crate::clients::{ExchangeApi, OrderHint};
use crate::error::{TradingError, TradingResult};
use crate::types::{is_rounded, Order, OrderId, OrderStatus, PairMetadata, Side};

/// Every order ever placed, in placement order
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub id: OrderId,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Default)]
struct PaperState {
    prices: VecDeque<Decimal>,
    orders: BTreeMap<u64, Order>,
    placed: Vec<PlacedOrder>,
    next_id: u64,
    fail_next_placements: usize,
    reject_all_placements: bool,
    fail_next_cancel_all: usize,
    fail_next_price_reads: usize,
    cancel_all_calls: usize,
    refresh_calls: usize,
}

pub struct PaperExchange {
    meta: PairMetadata,
    state: Mutex<PaperState>,
    hub: Arc<StreamHub>,
    price_feed: Option<Arc<dyn ExchangeApi>>,
    fee_rate: Decimal,
    auto_match: bool,
    keepalive: Option<Duration>,
}

impl PaperExchange {
    pub fn new(meta: PairMetadata, prices: impl IntoIterator<Item = Decimal>) -> Self {
        Self {
            meta,
            state: Mutex::new(PaperState {
                prices: prices.into_iter().collect(),
                next_id: 1,
                ..Default::default()
            }),
            hub: Arc::new(StreamHub::new()),
            price_feed: None,
            fee_rate: Decimal::ZERO,
            auto_match: false,
            keepalive: None,
        }
    }

    /// Read prices from another exchange (e.g. the public BitoPro ticker)
    pub fn with_price_feed(mut self, feed: Arc<dyn ExchangeApi>) -> Self {
        self.price_feed = Some(feed);
        self
    }

    /// Fee charged in quote currency as a fraction of notional
    pub fn with_fee_rate(mut self, rate: Decimal) -> Self {
        self.fee_rate = rate;
        self
    }

    /// Fill resting orders whenever a price read crosses them
    pub fn with_auto_match(mut self, enabled: bool) -> Self {
        self.auto_match = enabled;
        self
    }

    pub fn with_keepalive(mut self, period: Duration) -> Self {
        self.keepalive = Some(period);
        self
    }

    pub fn stream_connector(&self) -> PaperStreamConnector {
        PaperStreamConnector::new(Arc::clone(&self.hub))
    }

    pub fn hub(&self) -> Arc<StreamHub> {
        Arc::clone(&self.hub)
    }

    pub fn push_prices(&self, prices: impl IntoIterator<Item = Decimal>) {
        if let Ok(mut state) = self.state() {
            state.prices.extend(prices);
        }
    }

    /// Drop any scripted prices and quote `price` from now on
    pub fn set_price(&self, price: Decimal) {
        if let Ok(mut state) = self.state() {
            state.prices.clear();
            state.prices.push_back(price);
        }
    }

    /// Make the next `n` placements fail
    pub fn fail_placements(&self, n: usize) {
        if let Ok(mut state) = self.state() {
            state.fail_next_placements = n;
        }
    }

    pub fn reject_all_placements(&self, reject: bool) {
        if let Ok(mut state) = self.state() {
            state.reject_all_placements = reject;
        }
    }

    /// Make the next `n` bulk cancels fail
    pub fn fail_cancel_all(&self, n: usize) {
        if let Ok(mut state) = self.state() {
            state.fail_next_cancel_all = n;
        }
    }

    /// Make the next `n` price reads time out
    pub fn fail_price_reads(&self, n: usize) {
        if let Ok(mut state) = self.state() {
            state.fail_next_price_reads = n;
        }
    }

    pub fn open_orders(&self, side: Side) -> Vec<Order> {
        let Ok(state) = self.state() else {
            return Vec::new();
        };
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.side == side && !o.status.is_terminal())
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.price.cmp(&b.price));
        orders
    }

    pub fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.state().map(|s| s.placed.clone()).unwrap_or_default()
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.state().map(|s| s.cancel_all_calls).unwrap_or(0)
    }

    pub fn refresh_calls(&self) -> usize {
        self.state().map(|s| s.refresh_calls).unwrap_or(0)
    }

    /// Fill an open order completely at its limit price and publish a hint
    pub fn fill(&self, id: &OrderId) -> TradingResult<Order> {
        let order = {
            let mut state = self.state()?;
            let key = numeric_id(id)?;
            let fee_rate = self.fee_rate;
            let order = state
                .orders
                .get_mut(&key)
                .ok_or_else(|| TradingError::OrderRejected(format!("unknown order {}", id)))?;
            if order.status.is_terminal() {
                return Err(TradingError::OrderRejected(format!("order {} is {:?}", id, order.status)));
            }
            complete(order, fee_rate);
            order.clone()
        };

        info!("📝 Paper fill: {} {} @ {}", order.side, order.id, order.price);
        self.publish(&order);
        Ok(order)
    }

    /// Re-send the hint for an order, as a duplicate stream delivery would
    pub fn replay_hint(&self, id: &OrderId) -> bool {
        let order = match numeric_id(id).and_then(|key| {
            self.state()?
                .orders
                .get(&key)
                .cloned()
                .ok_or_else(|| TradingError::OrderRejected(format!("unknown order {}", id)))
        }) {
            Ok(order) => order,
            Err(_) => return false,
        };
        self.publish(&order)
    }

    fn publish(&self, order: &Order) -> bool {
        self.hub.publish(OrderHint {
            pair: order.pair.clone(),
            order_id: order.id.clone(),
            status_hint: Some(order.status),
        })
    }

    fn state(&self) -> TradingResult<MutexGuard<'_, PaperState>> {
        self.state
            .lock()
            .map_err(|_| TradingError::Internal("paper exchange state poisoned".to_string()))
    }

    fn scripted_price(&self) -> TradingResult<Decimal> {
        let mut state = self.state()?;
        let price = if state.prices.len() > 1 {
            state.prices.pop_front()
        } else {
            state.prices.front().copied()
        };
        price.ok_or_else(|| TradingError::ApiConnection("paper exchange has no price".to_string()))
    }

    /// Fill every resting order the price has crossed
    fn match_resting(&self, price: Decimal) -> TradingResult<()> {
        let filled: Vec<Order> = {
            let mut state = self.state()?;
            let fee_rate = self.fee_rate;
            state
                .orders
                .values_mut()
                .filter(|o| !o.status.is_terminal())
                .filter(|o| match o.side {
                    Side::Sell => price >= o.price,
                    Side::Buy => price <= o.price,
                })
                .map(|o| {
                    complete(o, fee_rate);
                    o.clone()
                })
                .collect()
        };

        for order in &filled {
            debug!("Paper match: {} {} @ {}", order.side, order.id, order.price);
            self.publish(order);
        }
        Ok(())
    }
}

fn complete(order: &mut Order, fee_rate: Decimal) {
    order.status = OrderStatus::Filled;
    order.executed_qty = order.orig_qty;
    order.avg_execution_price = order.price;
    order.fee = order.price * order.orig_qty * fee_rate;
    order.updated_at = Utc::now();
}

fn numeric_id(id: &OrderId) -> TradingResult<u64> {
    id.as_str()
        .parse()
        .map_err(|_| TradingError::OrderRejected(format!("unknown order {}", id)))
}

#[async_trait]
impl ExchangeApi for PaperExchange {
    async fn place_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        qty: Decimal,
    ) -> TradingResult<OrderId> {
        if !is_rounded(price, self.meta.price_precision) {
            return Err(TradingError::UnroundedPrice {
                price,
                precision: self.meta.price_precision,
            });
        }
        if !is_rounded(qty, self.meta.quantity_precision) {
            return Err(TradingError::UnroundedQuantity {
                quantity: qty,
                precision: self.meta.quantity_precision,
            });
        }

        let mut state = self.state()?;
        if state.reject_all_placements {
            return Err(TradingError::OrderRejected("paper exchange rejects all orders".to_string()));
        }
        if state.fail_next_placements > 0 {
            state.fail_next_placements -= 1;
            return Err(TradingError::OrderRejected("scripted placement failure".to_string()));
        }

        let key = state.next_id;
        state.next_id += 1;
        let id = OrderId(key.to_string());
        let quote = self.meta.quote_asset().to_string();

        state.orders.insert(
            key,
            Order {
                id: id.clone(),
                pair: pair.to_string(),
                side,
                price,
                orig_qty: qty,
                executed_qty: Decimal::ZERO,
                avg_execution_price: Decimal::ZERO,
                fee: Decimal::ZERO,
                fee_currency: quote,
                status: OrderStatus::New,
                updated_at: Utc::now(),
            },
        );
        state.placed.push(PlacedOrder {
            id: id.clone(),
            side,
            price,
            quantity: qty,
        });
        Ok(id)
    }

    async fn cancel_order(&self, _pair: &str, id: &OrderId) -> TradingResult<()> {
        let key = numeric_id(id)?;
        let mut state = self.state()?;
        let order = state
            .orders
            .get_mut(&key)
            .ok_or_else(|| TradingError::OrderRejected(format!("unknown order {}", id)))?;
        if order.status.is_terminal() {
            return Err(TradingError::OrderRejected(format!("order {} is already {:?}", id, order.status)));
        }
        order.status = OrderStatus::Canceled;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn cancel_all(&self, pair: &str) -> TradingResult<Vec<OrderId>> {
        let mut state = self.state()?;
        state.cancel_all_calls += 1;
        if state.fail_next_cancel_all > 0 {
            state.fail_next_cancel_all -= 1;
            return Err(TradingError::CancelFailed("scripted cancel failure".to_string()));
        }

        let now = Utc::now();
        let cancelled = state
            .orders
            .values_mut()
            .filter(|o| o.pair == pair && !o.status.is_terminal())
            .map(|o| {
                o.status = OrderStatus::Canceled;
                o.updated_at = now;
                o.id.clone()
            })
            .collect();
        Ok(cancelled)
    }

    async fn get_order(&self, _pair: &str, id: &OrderId) -> TradingResult<Order> {
        let key = numeric_id(id)?;
        self.state()?
            .orders
            .get(&key)
            .cloned()
            .ok_or_else(|| TradingError::ApiResponse {
                status: 404,
                body: format!("order {} not found", id),
            })
    }

    async fn get_price(&self, pair: &str) -> TradingResult<Decimal> {
        {
            let mut state = self.state()?;
            if state.fail_next_price_reads > 0 {
                state.fail_next_price_reads -= 1;
                return Err(TradingError::ApiTimeout("scripted price read failure".to_string()));
            }
        }
        let price = match &self.price_feed {
            Some(feed) => feed.get_price(pair).await?,
            None => self.scripted_price()?,
        };
        if self.auto_match {
            self.match_resting(price)?;
        }
        Ok(price)
    }

    async fn get_pair_metadata(&self, pair: &str) -> TradingResult<PairMetadata> {
        if pair != self.meta.pair {
            return Err(TradingError::InvalidParameter(
                "pair".to_string(),
                format!("{} is not listed on the paper exchange", pair),
            ));
        }
        Ok(self.meta.clone())
    }

    fn keepalive_period(&self) -> Option<Duration> {
        self.keepalive
    }

    async fn refresh_subscription(&self) -> TradingResult<()> {
        self.state()?.refresh_calls += 1;
        Ok(())
    }
}
