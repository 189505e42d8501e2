//! Order, bracket and leg flow through the scripted venue

use crate::common::{order_state, position, test_config, StubTransport};
use connector_common::{
    AccountSnapshot, ConnectorError, LegKind, OrderRef, OrderSide, OrderStatus, PositionSide,
    WorkingType,
};
use futures_connector::FuturesClient;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn client_with(transport: &Arc<StubTransport>) -> FuturesClient {
    FuturesClient::with_transport(transport.clone(), test_config())
}

#[tokio::test]
async fn market_order_sizes_from_last_price() {
    let transport = Arc::new(StubTransport::new());
    *transport.last_price.lock() = 50_000.0;
    let client = client_with(&transport);

    let ack = client
        .market_order("BTCUSDT", OrderSide::Buy, 1_000.0, PositionSide::Long)
        .await
        .unwrap();
    assert!(ack.order_id > 0);

    let orders = transport.submitted_orders.lock();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].order_type, "MARKET");
    assert_eq!(orders[0].quantity, "0.020");
    assert_eq!(orders[0].price, None);
    assert_eq!(orders[0].position_side, PositionSide::Long);
}

#[tokio::test]
async fn market_order_rejects_bad_ticker_price() {
    let transport = Arc::new(StubTransport::new());
    *transport.last_price.lock() = 0.0;
    let client = client_with(&transport);

    let err = client
        .market_order("BTCUSDT", OrderSide::Buy, 1_000.0, PositionSide::Long)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Validation { .. }));
    assert!(transport.submitted_orders.lock().is_empty());
}

#[tokio::test]
async fn dust_notional_never_reaches_the_venue() {
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    let err = client
        .market_order("BTCUSDT", OrderSide::Buy, 5.0, PositionSide::Long)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::QuantityTooSmall { .. }));
    assert!(transport.submitted_orders.lock().is_empty());
}

#[tokio::test]
async fn limit_order_rounds_price_to_tick_and_is_gtc() {
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    client
        .limit_order("BTCUSDT", OrderSide::Sell, 1_000.0, 50_000.06, PositionSide::Short)
        .await
        .unwrap();

    let orders = transport.submitted_orders.lock();
    assert_eq!(orders[0].order_type, "LIMIT");
    assert_eq!(orders[0].price.as_deref(), Some("50000.1"));
    assert_eq!(orders[0].time_in_force, Some("GTC"));
}

#[tokio::test]
async fn modify_returns_current_state_when_no_longer_amendable() {
    let transport = Arc::new(StubTransport::new());
    transport
        .queried_states
        .lock()
        .push(order_state(42, "BTCUSDT", "FILLED", "BUY"));
    let client = client_with(&transport);

    let state = client
        .modify_limit_order("BTCUSDT", OrderRef::Id(42), 1_000.0, 49_000.0)
        .await
        .unwrap();

    assert_eq!(state.status, OrderStatus::Filled);
    assert!(transport.amendments.lock().is_empty());
}

#[tokio::test]
async fn modify_amends_with_the_original_side() {
    let transport = Arc::new(StubTransport::new());
    transport
        .queried_states
        .lock()
        .push(order_state(42, "BTCUSDT", "NEW", "SELL"));
    let client = client_with(&transport);

    client
        .modify_limit_order("BTCUSDT", OrderRef::Id(42), 1_000.0, 49_000.0)
        .await
        .unwrap();

    let amendments = transport.amendments.lock();
    assert_eq!(amendments.len(), 1);
    assert_eq!(amendments[0].side, OrderSide::Sell);
    assert_eq!(amendments[0].price, "49000.0");
    assert_eq!(amendments[0].quantity, "0.020");
}

#[tokio::test]
async fn bracket_places_entry_and_both_legs() {
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    let bracket = client
        .place_bracket(
            "BTCUSDT",
            OrderSide::Buy,
            1_000.0,
            50_000.0,
            49_000.0,
            52_000.0,
            PositionSide::Long,
        )
        .await
        .unwrap();

    let orders = transport.submitted_orders.lock();
    let conditionals = transport.submitted_conditionals.lock();
    assert_eq!(orders.len(), 1);
    assert_eq!(conditionals.len(), 2);

    assert!(orders[0]
        .new_client_order_id
        .as_deref()
        .unwrap()
        .starts_with("s_"));
    assert_eq!(orders[0].quantity, "0.020");

    // Both legs exit on the opposite side with the entry quantity.
    for leg in conditionals.iter() {
        assert_eq!(leg.side, OrderSide::Sell);
        assert_eq!(leg.quantity, "0.020");
        assert_eq!(leg.working_type, WorkingType::MarkPrice);
        assert_eq!(leg.position_side, PositionSide::Long);
    }
    assert_eq!(conditionals[0].trigger_price, "49000.0");
    assert_eq!(conditionals[1].trigger_price, "52000.0");

    assert_eq!(bracket.stop_loss_algo_id + 1, bracket.take_profit_algo_id);
    assert_eq!(bracket.quantity, 0.02);
    assert_eq!(bracket.entry_order_id, orders[0].new_client_order_id.clone().unwrap());
}

#[tokio::test]
async fn bracket_leg_failure_leaves_entry_standing() {
    let transport = Arc::new(StubTransport::new());
    *transport.conditional_submit_error.lock() = Some((-4061, "position side mismatch".into()));
    let client = client_with(&transport);

    let err = client
        .place_bracket(
            "BTCUSDT",
            OrderSide::Buy,
            1_000.0,
            50_000.0,
            49_000.0,
            52_000.0,
            PositionSide::Long,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectorError::Venue { code: -4061, .. }));
    // Entry went out before the stop leg failed; nothing is rolled back.
    assert_eq!(transport.submitted_orders.lock().len(), 1);
    assert!(transport.submitted_conditionals.lock().is_empty());
}

#[tokio::test]
async fn modify_leg_cancels_then_recreates() {
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    let new_id = client
        .modify_stop_loss("BTCUSDT", 9_100, 48_500.0, Some(1_000.0), PositionSide::Long)
        .await
        .unwrap();

    assert_eq!(transport.canceled_algos.lock().as_slice(), &[9_100]);
    let conditionals = transport.submitted_conditionals.lock();
    assert_eq!(conditionals.len(), 1);
    assert_eq!(conditionals[0].order_type, LegKind::StopLoss.conditional_type());
    assert_eq!(conditionals[0].side, OrderSide::Sell);
    assert_eq!(conditionals[0].trigger_price, "48500.0");
    assert!(conditionals[0]
        .new_client_algo_id
        .as_deref()
        .unwrap()
        .starts_with("mod_stop_market_"));
    assert!(new_id > 0);
    assert_ne!(new_id, 9_100);
}

#[tokio::test]
async fn modify_leg_notional_converts_at_market_price_not_trigger() {
    let transport = Arc::new(StubTransport::new());
    *transport.last_price.lock() = 50_000.0;
    let client = client_with(&transport);

    // A stop far below the market must not inflate the quantity.
    client
        .modify_stop_loss("BTCUSDT", 9_100, 40_000.0, Some(1_000.0), PositionSide::Long)
        .await
        .unwrap();

    let conditionals = transport.submitted_conditionals.lock();
    assert_eq!(conditionals[0].trigger_price, "40000.0");
    assert_eq!(conditionals[0].quantity, "0.020");
}

#[tokio::test]
async fn modify_leg_without_notional_uses_position_size() {
    let transport = Arc::new(StubTransport::new());
    *transport.snapshot.lock() = AccountSnapshot {
        positions: vec![position("BTCUSDT", "SHORT", -0.157, 50_000.0)],
        ..AccountSnapshot::default()
    };
    let client = client_with(&transport);

    client
        .modify_take_profit("BTCUSDT", 9_200, 47_000.0, None, PositionSide::Short)
        .await
        .unwrap();

    let conditionals = transport.submitted_conditionals.lock();
    assert_eq!(conditionals[0].quantity, "0.157");
    assert_eq!(conditionals[0].side, OrderSide::Buy);
}

#[tokio::test]
async fn modify_leg_validates_inputs_locally() {
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    let err = client
        .modify_stop_loss("BTCUSDT", 0, 48_500.0, Some(1_000.0), PositionSide::Long)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Validation { .. }));

    let err = client
        .modify_stop_loss("BTCUSDT", 9_100, 48_500.0, Some(1_000.0), PositionSide::Both)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Validation { .. }));

    assert!(transport.canceled_algos.lock().is_empty());
}

#[tokio::test]
async fn cancel_leg_treats_missing_algo_as_success() {
    let transport = Arc::new(StubTransport::new());
    *transport.cancel_algo_error.lock() = Some((-4024, "algo order not found".into()));
    let client = client_with(&transport);

    client.cancel_leg(9_300).await.unwrap();
}

#[tokio::test]
async fn cancel_leg_propagates_other_rejections() {
    let transport = Arc::new(StubTransport::new());
    *transport.cancel_algo_error.lock() = Some((-1000, "internal error".into()));
    let client = client_with(&transport);

    let err = client.cancel_leg(9_300).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Venue { code: -1000, .. }));
}

#[tokio::test]
async fn force_close_is_a_noop_when_flat() {
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    let ack = client.force_close("BTCUSDT", PositionSide::Long).await.unwrap();
    assert!(ack.is_none());
    assert!(transport.submitted_orders.lock().is_empty());
}

#[tokio::test]
async fn force_close_sends_full_precision_market_order() {
    let transport = Arc::new(StubTransport::new());
    *transport.snapshot.lock() = AccountSnapshot {
        positions: vec![position("BTCUSDT", "LONG", 0.1234567, 50_000.0)],
        ..AccountSnapshot::default()
    };
    let client = client_with(&transport);

    let ack = client.force_close("BTCUSDT", PositionSide::Long).await.unwrap();
    assert!(ack.is_some());

    let orders = transport.submitted_orders.lock();
    assert_eq!(orders[0].order_type, "MARKET");
    assert_eq!(orders[0].side, OrderSide::Sell);
    // Full precision, not floored to the step size.
    assert_eq!(orders[0].quantity, "0.12345670");
}

#[tokio::test]
async fn force_close_shorts_buy_back() {
    let transport = Arc::new(StubTransport::new());
    *transport.snapshot.lock() = AccountSnapshot {
        positions: vec![position("BTCUSDT", "SHORT", -0.5, 50_000.0)],
        ..AccountSnapshot::default()
    };
    let client = client_with(&transport);

    client.force_close("BTCUSDT", PositionSide::Short).await.unwrap();
    assert_eq!(transport.submitted_orders.lock()[0].side, OrderSide::Buy);
}

#[tokio::test]
async fn leverage_is_validated_before_the_network() {
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    assert!(client.set_leverage("BTCUSDT", 0).await.is_err());
    assert!(client.set_leverage("BTCUSDT", 126).await.is_err());
    assert!(transport.leverage_calls.lock().is_empty());

    client.set_leverage("BTCUSDT", 20).await.unwrap();
    assert_eq!(
        transport.leverage_calls.lock().as_slice(),
        &[("BTCUSDT".to_string(), 20)]
    );
}

#[tokio::test]
async fn benign_leverage_rejections_are_swallowed() {
    let transport = Arc::new(StubTransport::new());
    *transport.leverage_error.lock() = Some((-4141, "leverage not available".into()));
    let client = client_with(&transport);
    client.set_leverage("BTCUSDT", 100).await.unwrap();

    *transport.leverage_error.lock() = Some((-4059, "no need to change".into()));
    client.set_leverage("BTCUSDT", 100).await.unwrap();

    *transport.leverage_error.lock() = Some((-1000, "internal error".into()));
    assert!(client.set_leverage("BTCUSDT", 100).await.is_err());
}

#[tokio::test]
async fn hedge_mode_already_enabled_counts_as_success() {
    let transport = Arc::new(StubTransport::new());
    *transport.position_mode_error.lock() = Some((-4059, "no need to change".into()));
    let client = client_with(&transport);

    client.enable_hedge_mode().await.unwrap();
}

#[tokio::test]
async fn cancel_order_returns_final_state() {
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    let state = client
        .cancel_order("BTCUSDT", OrderRef::ClientId("s_123".into()))
        .await
        .unwrap();
    assert_eq!(state.status, OrderStatus::Canceled);
    assert_eq!(transport.canceled_orders.lock().len(), 1);
}
