// Integration tests for the ladder controller against the paper exchange

mod common;

use rust_decimal_macros::dec;

use ladder_grid_bot::core::{LadderController, LadderReaction};
use ladder_grid_bot::simulation::PaperExchange;
use ladder_grid_bot::{ExchangeApi, OrderStatus, PairMetadata, Side, TradingError};

use common::{test_meta, test_session_config, PAIR};

#[tokio::test]
async fn test_ladder_rounds_away_from_the_reference() {
    let exchange = PaperExchange::new(test_meta(), [dec!(33.337)]);
    let mut config = test_session_config();
    config.step_up = dec!(0.015);
    config.step_down = dec!(0.015);
    config.trade_count = 2;

    let mut ladder = LadderController::new(test_meta());
    let report = ladder.place_initial_ladder(&exchange, &config).await.unwrap();

    assert_eq!(report.placed, 4);
    assert!(report.errors.is_empty());
    assert_eq!(ladder.origin_price(), Some(dec!(33.33)));

    let sells: Vec<_> = exchange.open_orders(Side::Sell).iter().map(|o| o.price).collect();
    let buys: Vec<_> = exchange.open_orders(Side::Buy).iter().map(|o| o.price).collect();
    assert_eq!(sells, vec![dec!(33.83), dec!(34.33)]);
    assert_eq!(buys, vec![dec!(32.33), dec!(32.83)]);
}

#[tokio::test]
async fn test_every_order_uses_rounded_quantity() {
    let exchange = PaperExchange::new(test_meta(), [dec!(100)]);
    let mut config = test_session_config();
    config.order_size = dec!(0.012345);

    let mut ladder = LadderController::new(test_meta());
    ladder.place_initial_ladder(&exchange, &config).await.unwrap();

    assert!(exchange
        .placed_orders()
        .iter()
        .all(|o| o.quantity == dec!(0.0123)));
}

#[tokio::test]
async fn test_min_notional_skips_small_orders() {
    let meta = PairMetadata {
        min_notional: Some(dec!(1)),
        ..test_meta()
    };
    let exchange = PaperExchange::new(meta.clone(), [dec!(100)]);
    let config = test_session_config();

    let mut ladder = LadderController::new(meta);
    let report = ladder.place_initial_ladder(&exchange, &config).await.unwrap();

    // 0.01 x 99 and below is under the minimum
    assert_eq!(report.placed, 3);
    assert_eq!(report.errors.len(), 3);
    assert_eq!(ladder.sell_ids().len(), 3);
    assert!(ladder.buy_ids().is_empty());
}

#[tokio::test]
async fn test_no_orders_placed_is_an_error() {
    let exchange = PaperExchange::new(test_meta(), [dec!(100)]);
    exchange.reject_all_placements(true);

    let mut ladder = LadderController::new(test_meta());
    let err = ladder
        .place_initial_ladder(&exchange, &test_session_config())
        .await
        .unwrap_err();

    assert!(matches!(err, TradingError::NoOrdersPlaced(_)));
    assert!(err.is_fatal());
    assert!(ladder.is_empty());
}

#[tokio::test]
async fn test_order_size_below_minimum_is_rejected_before_placing() {
    let exchange = PaperExchange::new(test_meta(), [dec!(100)]);
    let mut config = test_session_config();
    config.order_size = dec!(0.00004);

    let mut ladder = LadderController::new(test_meta());
    let err = ladder.place_initial_ladder(&exchange, &config).await.unwrap_err();

    assert!(matches!(err, TradingError::InvalidParameter(..)));
    assert!(exchange.placed_orders().is_empty());
}

#[tokio::test]
async fn test_order_updates_by_status() {
    let exchange = PaperExchange::new(test_meta(), [dec!(100)]);
    let config = test_session_config();
    let mut ladder = LadderController::new(test_meta());
    ladder.place_initial_ladder(&exchange, &config).await.unwrap();

    // Still resting
    let buy = exchange.open_orders(Side::Buy)[0].clone();
    assert_eq!(
        ladder.handle_order_update(&exchange, &config, &buy).await,
        LadderReaction::StillOpen
    );

    let mut partial = buy.clone();
    partial.status = OrderStatus::PartiallyFilled;
    partial.executed_qty = dec!(0.005);
    assert_eq!(
        ladder.handle_order_update(&exchange, &config, &partial).await,
        LadderReaction::StillOpen
    );
    assert!(ladder.is_tracked(&buy.id));

    // Cancelled on the exchange side
    exchange.cancel_order(PAIR, &buy.id).await.unwrap();
    let cancelled = exchange.get_order(PAIR, &buy.id).await.unwrap();
    assert!(matches!(
        ladder.handle_order_update(&exchange, &config, &cancelled).await,
        LadderReaction::Dropped(_)
    ));
    assert!(!ladder.is_tracked(&buy.id));
    assert_eq!(ladder.buy_ids().len(), 2);

    // A second delivery of the same state is ignored
    assert_eq!(
        ladder.handle_order_update(&exchange, &config, &cancelled).await,
        LadderReaction::Untracked
    );
}

#[tokio::test]
async fn test_fill_updates_last_traded_price() {
    let exchange = PaperExchange::new(test_meta(), [dec!(100)]);
    let config = test_session_config();
    let mut ladder = LadderController::new(test_meta());
    ladder.place_initial_ladder(&exchange, &config).await.unwrap();

    let sell = exchange.open_orders(Side::Sell)[0].id.clone();
    let filled = exchange.fill(&sell).unwrap();

    let reaction = ladder.handle_order_update(&exchange, &config, &filled).await;
    assert_eq!(
        reaction,
        LadderReaction::Replaced {
            placed: 2,
            errors: vec![]
        }
    );
    assert_eq!(ladder.last_traded_price(), Some(dec!(101)));
    assert_eq!(ladder.origin_price(), Some(dec!(100)));
    assert_eq!(ladder.sell_ids().len(), 3);
    assert_eq!(ladder.buy_ids().len(), 4);
}

#[tokio::test]
async fn test_cancel_all_clears_only_on_success() {
    let exchange = PaperExchange::new(test_meta(), [dec!(100)]);
    let config = test_session_config();
    let mut ladder = LadderController::new(test_meta());
    ladder.place_initial_ladder(&exchange, &config).await.unwrap();

    exchange.fail_cancel_all(1);
    assert!(ladder.cancel_all_open_orders(&exchange, PAIR).await.is_err());
    assert_eq!(ladder.buy_ids().len() + ladder.sell_ids().len(), 6);

    let tracked = ladder.cancel_all_open_orders(&exchange, PAIR).await.unwrap();
    assert_eq!(tracked, 6);
    assert!(ladder.is_empty());
    assert!(exchange.open_orders(Side::Sell).is_empty());
}
