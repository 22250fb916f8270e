//! Ladder controller
//!
//! Keeps `trade_count` resting orders on each side of a reference price and
//! replaces them as they fill. Only ids and side membership are tracked here;
//! full order detail always comes from the exchange.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::session_config::SessionConfig;
use crate::clients::ExchangeApi;
use crate::error::{TradingError, TradingResult};
use crate::types::{round_down, round_up, Order, OrderId, OrderStatus, PairMetadata, Side};

/// What the ladder did with an order update
#[derive(Debug, Clone, PartialEq)]
pub enum LadderReaction {
    /// Id is in neither side set
    Untracked,
    /// Tracked but not finished (new or partially filled)
    StillOpen,
    /// Exchange cancelled or rejected it; removed from its set
    Dropped(String),
    /// Filled; replacements attempted
    Replaced { placed: usize, errors: Vec<String> },
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlacementReport {
    pub placed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LadderController {
    meta: PairMetadata,
    origin_price: Option<Decimal>,
    last_traded_price: Option<Decimal>,
    buy_ids: HashSet<OrderId>,
    sell_ids: HashSet<OrderId>,
}

impl LadderController {
    pub fn new(meta: PairMetadata) -> Self {
        Self {
            meta,
            origin_price: None,
            last_traded_price: None,
            buy_ids: HashSet::new(),
            sell_ids: HashSet::new(),
        }
    }

    pub fn origin_price(&self) -> Option<Decimal> {
        self.origin_price
    }

    pub fn last_traded_price(&self) -> Option<Decimal> {
        self.last_traded_price
    }

    pub fn buy_ids(&self) -> &HashSet<OrderId> {
        &self.buy_ids
    }

    pub fn sell_ids(&self) -> &HashSet<OrderId> {
        &self.sell_ids
    }

    pub fn is_tracked(&self, id: &OrderId) -> bool {
        self.buy_ids.contains(id) || self.sell_ids.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.buy_ids.is_empty() && self.sell_ids.is_empty()
    }

    /// Order size rounded down to the pair's quantity precision
    pub fn order_quantity(&self, config: &SessionConfig) -> TradingResult<Decimal> {
        let qty = round_down(config.order_size, self.meta.quantity_precision);
        if qty <= Decimal::ZERO {
            return Err(TradingError::InvalidParameter(
                "order_size".to_string(),
                format!(
                    "{} rounds to zero at {} decimal places",
                    config.order_size, self.meta.quantity_precision
                ),
            ));
        }
        if let Some(min) = self.meta.min_order_qty {
            if qty < min {
                return Err(TradingError::InvalidParameter(
                    "order_size".to_string(),
                    format!("{} is below the exchange minimum {}", qty, min),
                ));
            }
        }
        Ok(qty)
    }

    /// Read the current price, re-centre on it and place the full ladder.
    /// Fails only when not a single order could be placed.
    pub async fn place_initial_ladder(
        &mut self,
        exchange: &dyn ExchangeApi,
        config: &SessionConfig,
    ) -> TradingResult<PlacementReport> {
        let qty = self.order_quantity(config)?;
        let price = exchange.get_price(&config.pair).await?;
        let reference = round_down(price, self.meta.price_precision);
        self.origin_price = Some(reference);
        self.last_traded_price = Some(reference);
        info!("📈 Reference price for {}: {}", config.pair, reference);

        let (sells, buys) = ladder_prices(reference, config, self.meta.price_precision);
        let mut report = PlacementReport::default();

        for price in sells {
            self.place(exchange, config, Side::Sell, price, qty, &mut report).await;
        }
        for price in buys {
            self.place(exchange, config, Side::Buy, price, qty, &mut report).await;
        }

        if self.is_empty() {
            return Err(TradingError::NoOrdersPlaced(report.errors.join("; ")));
        }

        info!(
            "✅ Ladder placed for {}: {} sells, {} buys ({} errors)",
            config.pair,
            self.sell_ids.len(),
            self.buy_ids.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// React to an authoritative order state.
    pub async fn handle_order_update(
        &mut self,
        exchange: &dyn ExchangeApi,
        config: &SessionConfig,
        order: &Order,
    ) -> LadderReaction {
        if !self.is_tracked(&order.id) {
            debug!("Ignoring update for untracked order {}", order.id);
            return LadderReaction::Untracked;
        }

        match order.status {
            OrderStatus::New | OrderStatus::PartiallyFilled => LadderReaction::StillOpen,
            OrderStatus::Canceled | OrderStatus::Rejected => {
                self.remove(order.side, &order.id);
                let msg = format!(
                    "{} order {} was {:?} by the exchange",
                    order.side,
                    order.id,
                    order.status
                );
                warn!("⚠️ {}", msg);
                LadderReaction::Dropped(msg)
            }
            OrderStatus::Filled => self.replace_filled(exchange, config, order).await,
        }
    }

    async fn replace_filled(
        &mut self,
        exchange: &dyn ExchangeApi,
        config: &SessionConfig,
        order: &Order,
    ) -> LadderReaction {
        self.remove(order.side, &order.id);
        let fill_price = order.fill_price();
        self.last_traded_price = Some(fill_price);

        let mut report = PlacementReport::default();
        let qty = match self.order_quantity(config) {
            Ok(q) => q,
            Err(e) => {
                report.errors.push(e.to_string());
                return LadderReaction::Replaced { placed: 0, errors: report.errors };
            }
        };

        let origin = self.origin_price.unwrap_or(fill_price);
        let remaining = match order.side {
            Side::Sell => self.sell_ids.len(),
            Side::Buy => self.buy_ids.len(),
        };
        let (opposite, same) = replacement_prices(
            order.side,
            fill_price,
            origin,
            config,
            remaining,
            self.meta.price_precision,
        );

        info!(
            "💰 {} {} filled at {}; replacing with {} @ {} and {} @ {}",
            order.side,
            order.id,
            fill_price,
            order.side.opposite(),
            opposite,
            order.side,
            same
        );

        self.place(exchange, config, order.side.opposite(), opposite, qty, &mut report)
            .await;
        self.place(exchange, config, order.side, same, qty, &mut report).await;

        LadderReaction::Replaced {
            placed: report.placed,
            errors: report.errors,
        }
    }

    /// Bulk cancel. Sets are cleared only once the exchange confirms.
    pub async fn cancel_all_open_orders(
        &mut self,
        exchange: &dyn ExchangeApi,
        pair: &str,
    ) -> TradingResult<usize> {
        let cancelled = exchange.cancel_all(pair).await?;
        let tracked = self.buy_ids.len() + self.sell_ids.len();
        self.buy_ids.clear();
        self.sell_ids.clear();
        info!(
            "🧹 Cancelled open orders on {} ({} reported, {} tracked)",
            pair,
            cancelled.len(),
            tracked
        );
        Ok(tracked)
    }

    async fn place(
        &mut self,
        exchange: &dyn ExchangeApi,
        config: &SessionConfig,
        side: Side,
        price: Decimal,
        qty: Decimal,
        report: &mut PlacementReport,
    ) {
        if price <= Decimal::ZERO {
            report.errors.push(format!(
                "{} at {} skipped: price is not positive",
                side,
                price
            ));
            return;
        }

        if let Some(min_notional) = self.meta.min_notional {
            if price * qty < min_notional {
                report.errors.push(format!(
                    "{} at {} skipped: notional {} below minimum {}",
                    side,
                    price,
                    price * qty,
                    min_notional
                ));
                return;
            }
        }

        match exchange.place_order(&config.pair, side, price, qty).await {
            Ok(id) => {
                debug!("Placed {} {} @ {} as {}", side, qty, price, id);
                match side {
                    Side::Buy => self.buy_ids.insert(id),
                    Side::Sell => self.sell_ids.insert(id),
                };
                report.placed += 1;
            }
            Err(e) => {
                let msg = format!("{} @ {} failed: {}", side, price, e);
                warn!("❌ {}", msg);
                report.errors.push(msg);
            }
        }
    }

    fn remove(&mut self, side: Side, id: &OrderId) {
        // Trust membership over the reported side
        if !self.sell_ids.remove(id) && !self.buy_ids.remove(id) {
            debug!("{} {} already gone from the ladder", side, id);
        }
    }
}

/// Initial ladder prices: sells round up, buys round down.
pub fn ladder_prices(
    reference: Decimal,
    config: &SessionConfig,
    precision: u32,
) -> (Vec<Decimal>, Vec<Decimal>) {
    let levels = 1..=config.trade_count;
    let sells = levels
        .clone()
        .map(|i| round_up(reference * (Decimal::ONE + config.step_up * Decimal::from(i)), precision))
        .collect();
    let buys = levels
        .map(|i| round_down(reference * (Decimal::ONE - config.step_down * Decimal::from(i)), precision))
        .collect();
    (sells, buys)
}

/// Prices for the two replacement orders after a fill at `fill_price`.
/// Returns (opposite side price, same side price). `remaining` is the size
/// of the filled side's set after removing the filled order.
pub fn replacement_prices(
    filled_side: Side,
    fill_price: Decimal,
    origin: Decimal,
    config: &SessionConfig,
    remaining: usize,
    precision: u32,
) -> (Decimal, Decimal) {
    let distance = Decimal::from(remaining as u64 + 1);
    match filled_side {
        Side::Sell => (
            round_down(fill_price, precision),
            round_up(fill_price + origin * config.step_up * distance, precision),
        ),
        Side::Buy => (
            round_up(fill_price, precision),
            round_down(fill_price - origin * config.step_down * distance, precision),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> SessionConfig {
        SessionConfig {
            pair: "btc_twd".to_string(),
            order_size: dec!(0.01),
            step_up: dec!(0.01),
            step_down: dec!(0.01),
            trade_count: 3,
            reset_threshold: dec!(0.03),
            cancel_threshold: dec!(0.10),
        }
    }

    #[test]
    fn test_ladder_prices() {
        let (sells, buys) = ladder_prices(dec!(100), &config(), 2);
        assert_eq!(sells, vec![dec!(101), dec!(102), dec!(103)]);
        assert_eq!(buys, vec![dec!(99), dec!(98), dec!(97)]);
    }

    #[test]
    fn test_ladder_rounding_direction() {
        let mut c = config();
        c.step_up = dec!(0.0033);
        c.step_down = dec!(0.0033);
        c.trade_count = 1;
        let (sells, buys) = ladder_prices(dec!(100), &c, 0);
        // 100.33 rounds up, 99.67 rounds down
        assert_eq!(sells, vec![dec!(101)]);
        assert_eq!(buys, vec![dec!(99)]);
    }

    #[test]
    fn test_sell_fill_recentres() {
        // Ladder at 100 with 3 sells; the 101 sell fills, 2 sells remain
        let (buy, sell) = replacement_prices(Side::Sell, dec!(101), dec!(100), &config(), 2, 2);
        assert_eq!(buy, dec!(101));
        assert_eq!(sell, dec!(104));
    }

    #[test]
    fn test_buy_fill_recentres() {
        let (sell, buy) = replacement_prices(Side::Buy, dec!(99), dec!(100), &config(), 2, 2);
        assert_eq!(sell, dec!(99));
        assert_eq!(buy, dec!(96));
    }

    #[test]
    fn test_order_quantity_rounding() {
        let meta = PairMetadata {
            pair: "btc_twd".to_string(),
            price_precision: 0,
            quantity_precision: 2,
            min_order_qty: Some(dec!(0.01)),
            min_notional: None,
        };
        let ladder = LadderController::new(meta);
        let mut c = config();
        c.order_size = dec!(0.019);
        assert_eq!(ladder.order_quantity(&c).unwrap(), dec!(0.01));
        c.order_size = dec!(0.009);
        assert!(ladder.order_quantity(&c).is_err());
    }
}
