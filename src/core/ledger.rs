//! Trade ledger and FIFO profit matching
//!
//! `match_fifo` is pure and works on any record history for one pair.
//! `TradeLedger` wires it to a `TradeStore` and owns the fill upserts.

use std::collections::VecDeque;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{TradeRecord, TradeStore, UpsertOutcome};
use crate::error::{TradingError, TradingResult};
use crate::types::{split_pair, Order, Side};

/// Buy quantity left over after FIFO consumption
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenLot {
    pub buy_id: String,
    pub quantity: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedSell {
    pub sell_id: String,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FifoReport {
    pub realized_profit: Decimal,
    pub matched_quantity: Decimal,
    /// Fees attributed to matched quantity, in quote currency
    pub matched_fees: Decimal,
    pub open_lots: Vec<OpenLot>,
    pub unmatched_sells: Vec<UnmatchedSell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenPosition {
    pub pair: String,
    pub total_bought: Decimal,
    pub total_sold: Decimal,
    /// `total_bought - total_sold`
    pub net_quantity: Decimal,
    pub open_lots: Vec<OpenLot>,
}

struct Lot<'a> {
    record: &'a TradeRecord,
    remaining: Decimal,
}

/// Fee of a record expressed in quote currency
fn fee_in_quote(record: &TradeRecord, base_asset: &str) -> Decimal {
    if !base_asset.is_empty() && record.fee_currency.eq_ignore_ascii_case(base_asset) {
        record.fee * record.price
    } else {
        record.fee
    }
}

fn fee_share(record: &TradeRecord, matched: Decimal, base_asset: &str) -> Decimal {
    if record.quantity <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    fee_in_quote(record, base_asset) * matched / record.quantity
}

/// Match sells against buys oldest-first. Both slices must already be in
/// settlement order.
pub fn match_fifo(buys: &[TradeRecord], sells: &[TradeRecord], base_asset: &str) -> FifoReport {
    let mut lots: VecDeque<Lot> = buys
        .iter()
        .filter(|b| b.quantity > Decimal::ZERO)
        .map(|record| Lot {
            record,
            remaining: record.quantity,
        })
        .collect();

    let mut report = FifoReport::default();

    for sell in sells {
        let mut to_match = sell.quantity;

        while to_match > Decimal::ZERO {
            let Some(lot) = lots.front_mut() else {
                break;
            };

            let matched = to_match.min(lot.remaining);
            let fees = fee_share(lot.record, matched, base_asset) + fee_share(sell, matched, base_asset);

            report.realized_profit += matched * (sell.price - lot.record.price) - fees;
            report.matched_quantity += matched;
            report.matched_fees += fees;

            lot.remaining -= matched;
            to_match -= matched;
            if lot.remaining <= Decimal::ZERO {
                lots.pop_front();
            }
        }

        if to_match > Decimal::ZERO {
            report.unmatched_sells.push(UnmatchedSell {
                sell_id: sell.id.clone(),
                quantity: to_match,
            });
        }
    }

    report.open_lots = lots
        .into_iter()
        .map(|lot| OpenLot {
            buy_id: lot.record.id.clone(),
            quantity: lot.remaining,
            price: lot.record.price,
        })
        .collect();

    report
}

pub struct TradeLedger {
    store: Arc<dyn TradeStore>,
}

impl TradeLedger {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self { store }
    }

    /// Persist whatever has executed on `order`. Orders with nothing
    /// executed are skipped.
    pub fn record_fill(&self, order: &Order, run_id: Option<&str>) -> TradingResult<Option<UpsertOutcome>> {
        let Some(record) = TradeRecord::from_order(order, run_id) else {
            return Ok(None);
        };

        let outcome = self.store.upsert(&record)?;
        match outcome {
            UpsertOutcome::Inserted | UpsertOutcome::Updated => info!(
                "📒 Recorded {} {} {} @ {} ({:?})",
                record.side,
                record.quantity,
                record.pair,
                record.price,
                outcome
            ),
            UpsertOutcome::Frozen => debug!("Record {} already final", record.id),
        }
        Ok(Some(outcome))
    }

    /// FIFO report over the full history of `pair`, unmatched sells included
    pub fn fifo_report(&self, pair: &str) -> TradingResult<FifoReport> {
        let buys = self.store.list(pair, Side::Buy)?;
        let sells = self.store.list(pair, Side::Sell)?;
        Ok(match_fifo(&buys, &sells, split_pair(pair).0))
    }

    /// Realized profit in quote currency. Fails if some sell quantity is left
    /// over once every recorded buy of the pair has been consumed.
    pub fn compute_realized_profit(&self, pair: &str) -> TradingResult<Decimal> {
        let report = self.fifo_report(pair)?;
        if let Some(first) = report.unmatched_sells.first() {
            return Err(TradingError::LedgerInconsistency {
                pair: pair.to_string(),
                sell_id: first.sell_id.clone(),
                unmatched: first.quantity,
            });
        }
        Ok(report.realized_profit)
    }

    pub fn compute_open_position(&self, pair: &str) -> TradingResult<OpenPosition> {
        let buys = self.store.list(pair, Side::Buy)?;
        let sells = self.store.list(pair, Side::Sell)?;

        let total_bought: Decimal = buys.iter().map(|r| r.quantity).sum();
        let total_sold: Decimal = sells.iter().map(|r| r.quantity).sum();
        let report = match_fifo(&buys, &sells, split_pair(pair).0);

        Ok(OpenPosition {
            pair: pair.to_string(),
            total_bought,
            total_sold,
            net_quantity: total_bought - total_sold,
            open_lots: report.open_lots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn rec(id: &str, side: Side, qty: Decimal, price: Decimal, fee: Decimal, fee_ccy: &str) -> TradeRecord {
        TradeRecord {
            id: id.to_string(),
            run_id: None,
            pair: "btc_twd".to_string(),
            side,
            quantity: qty,
            price,
            fee,
            fee_currency: fee_ccy.to_string(),
            settled_at: Utc.timestamp_millis_opt(0).single().unwrap(),
            filled: true,
        }
    }

    #[test]
    fn test_fifo_consumes_oldest_first() {
        let buys = vec![
            rec("b1", Side::Buy, dec!(1.0), dec!(100), dec!(0), ""),
            rec("b2", Side::Buy, dec!(1.0), dec!(110), dec!(0), ""),
        ];
        let sells = vec![rec("s1", Side::Sell, dec!(1.5), dec!(120), dec!(0), "")];

        let report = match_fifo(&buys, &sells, "btc");
        assert_eq!(report.realized_profit, dec!(25));
        assert_eq!(report.open_lots, vec![OpenLot { buy_id: "b2".into(), quantity: dec!(0.5), price: dec!(110) }]);
        assert!(report.unmatched_sells.is_empty());
    }

    #[test]
    fn test_fees_are_proportional_and_converted() {
        // Buy fee 0.01 btc at 100 = 1 twd for the whole lot; half matched = 0.5
        // Sell fee 2 twd for 0.5 btc, fully matched
        let buys = vec![rec("b1", Side::Buy, dec!(1), dec!(100), dec!(0.01), "BTC")];
        let sells = vec![rec("s1", Side::Sell, dec!(0.5), dec!(110), dec!(2), "twd")];

        let report = match_fifo(&buys, &sells, "btc");
        assert_eq!(report.matched_fees, dec!(2.5));
        assert_eq!(report.realized_profit, dec!(2.5));
    }

    #[test]
    fn test_unmatched_sell_reported() {
        let buys = vec![rec("b1", Side::Buy, dec!(1), dec!(100), dec!(0), "")];
        let sells = vec![rec("s1", Side::Sell, dec!(1.25), dec!(120), dec!(0), "")];

        let report = match_fifo(&buys, &sells, "btc");
        assert_eq!(report.realized_profit, dec!(20));
        assert_eq!(report.unmatched_sells, vec![UnmatchedSell { sell_id: "s1".into(), quantity: dec!(0.25) }]);
        assert!(report.open_lots.is_empty());
    }
}
