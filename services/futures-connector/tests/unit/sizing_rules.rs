//! Symbol rule cache behavior against the scripted venue

use crate::common::{exchange_info_for, StubTransport};
use connector_common::ConnectorError;
use futures_connector::sizing::OrderSizer;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn rules_fetch_once_and_cache() {
    let transport = Arc::new(StubTransport::new());
    let sizer = OrderSizer::new(transport.clone());

    let first = sizer.rules("BTCUSDT").await.unwrap();
    let second = sizer.rules("BTCUSDT").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(transport.metadata_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(first.min_qty, 0.001);
    assert_eq!(first.step_size, 0.001);
    assert_eq!(first.quantity_precision, 3);
    assert_eq!(first.tick_size, 0.1);
    // The "0.10" wire tick carries one significant decimal.
    assert_eq!(first.price_precision, 1);
}

#[tokio::test]
async fn unknown_symbol_is_rejected() {
    let transport = Arc::new(StubTransport::new());
    let sizer = OrderSizer::new(transport.clone());

    let err = sizer.rules("DOGEUSDT").await.unwrap_err();
    assert!(matches!(err, ConnectorError::SymbolNotFound { symbol } if symbol == "DOGEUSDT"));
}

#[tokio::test]
async fn missing_filters_are_an_error() {
    let transport = Arc::new(StubTransport::new());
    *transport.exchange_info.lock() = serde_json::from_value(serde_json::json!({
        "symbols": [{"symbol": "BTCUSDT", "filters": []}]
    }))
    .unwrap();
    let sizer = OrderSizer::new(transport.clone());

    let err = sizer.rules("BTCUSDT").await.unwrap_err();
    assert!(matches!(err, ConnectorError::FilterMissing { .. }));
}

#[tokio::test]
async fn integer_step_yields_zero_precision() {
    let transport = Arc::new(StubTransport::new());
    *transport.exchange_info.lock() = exchange_info_for("1000PEPEUSDT", "1", "1", "0.0000001");
    let sizer = OrderSizer::new(transport.clone());

    let rule = sizer.rules("1000PEPEUSDT").await.unwrap();
    assert_eq!(rule.quantity_precision, 0);

    let qty = sizer.quantity_from_notional(&rule, 25.0, 0.012).unwrap();
    assert_eq!(qty, 2083.0);
    assert_eq!(sizer.format_quantity(&rule, qty), "2083");
}
