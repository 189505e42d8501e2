//! Full-client session lifecycle against the scripted venue

use crate::common::{
    kline_frame, position, test_config, user_event_frame, wait_until, StubTransport,
};
use crate::init_test_logging;
use connector_common::{AccountSnapshot, ConnectionStatus};
use futures_connector::FuturesClient;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn client_with(transport: &Arc<StubTransport>) -> FuturesClient {
    FuturesClient::with_transport(transport.clone(), test_config())
}

async fn connect_and_wait(client: &FuturesClient, transport: &Arc<StubTransport>) {
    client.connect("BTCUSDT", "1m");
    assert!(
        wait_until(|| client.status() == ConnectionStatus::Connected, WAIT).await,
        "session never became connected"
    );
    // Both streams must be open before tests inject frames.
    assert!(
        wait_until(|| !transport.user_senders.lock().is_empty(), WAIT).await,
        "user stream never opened"
    );
}

#[tokio::test]
async fn connect_runs_the_full_setup_sequence() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);
    let mut status = client.subscribe_status();

    connect_and_wait(&client, &transport).await;

    // Replay of the initial state, then the two transitions.
    assert_eq!(status.recv().await, Some(ConnectionStatus::Disconnected));
    assert_eq!(status.recv().await, Some(ConnectionStatus::Connecting));
    assert_eq!(status.recv().await, Some(ConnectionStatus::Connected));

    assert_eq!(transport.sessions_opened.load(Ordering::SeqCst), 1);
    assert_eq!(
        transport.market_streams.lock().as_slice(),
        &[vec!["btcusdt@kline_1m".to_string()]]
    );
    assert_eq!(
        transport.user_streams.lock().as_slice(),
        &["listen-key-1".to_string()]
    );
    // Initial reconciliation ran as part of setup.
    assert!(transport.snapshot_fetches.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn connect_twice_keeps_a_single_session() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    connect_and_wait(&client, &transport).await;
    client.connect("BTCUSDT", "1m");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.sessions_opened.load(Ordering::SeqCst), 1);
    assert_eq!(transport.market_streams.lock().len(), 1);
}

#[tokio::test]
async fn kline_frames_update_the_candle_channel() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);
    let mut candles = client.subscribe_candles();

    connect_and_wait(&client, &transport).await;

    transport.send_market_frame(kline_frame("BTCUSDT", 43_050.5)).await;
    let candle = candles.recv().await.unwrap();
    assert_eq!(candle.close, 43_050.5);

    // An updated in-progress bar overwrites the latest value.
    transport.send_market_frame(kline_frame("BTCUSDT", 43_060.0)).await;
    let candle = candles.recv().await.unwrap();
    assert_eq!(candle.close, 43_060.0);
    assert_eq!(client.latest_candle().unwrap().close, 43_060.0);
}

#[tokio::test]
async fn account_events_trigger_reconciliation() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);
    let mut positions = client.subscribe_positions();

    connect_and_wait(&client, &transport).await;
    positions.recv().await.unwrap(); // initial empty set

    *transport.snapshot.lock() = AccountSnapshot {
        positions: vec![position("BTCUSDT", "LONG", 0.5, 43_000.0)],
        ..AccountSnapshot::default()
    };
    transport
        .send_user_frame(user_event_frame("ORDER_TRADE_UPDATE"))
        .await;

    let published = positions.recv().await.unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].symbol, "BTCUSDT");
}

#[tokio::test]
async fn malformed_frames_do_not_kill_the_session() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);
    let mut candles = client.subscribe_candles();

    connect_and_wait(&client, &transport).await;

    transport.send_market_frame("not json at all".to_string()).await;
    transport.send_market_frame(r#"{"e":"kline"}"#.to_string()).await;
    transport.send_market_frame(kline_frame("BTCUSDT", 43_000.0)).await;

    // The good frame after the bad ones still arrives.
    assert_eq!(candles.recv().await.unwrap().close, 43_000.0);
    assert_eq!(client.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn stream_death_triggers_reconnect() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    connect_and_wait(&client, &transport).await;
    transport.kill_streams();

    assert!(
        wait_until(
            || transport.sessions_opened.load(Ordering::SeqCst) >= 2,
            WAIT
        )
        .await,
        "no reconnect after stream death"
    );
    assert!(wait_until(|| client.status() == ConnectionStatus::Connected, WAIT).await);
    assert_eq!(transport.user_streams.lock().last().unwrap(), "listen-key-2");
}

#[tokio::test]
async fn setup_failures_back_off_and_retry() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    transport.session_failures.store(2, Ordering::SeqCst);
    let client = client_with(&transport);

    connect_and_wait(&client, &transport).await;

    // Two failed attempts plus the successful third.
    assert_eq!(transport.sessions_opened.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn authorization_failure_stops_retrying() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    transport.auth_fail.store(true, Ordering::SeqCst);
    let client = client_with(&transport);

    client.connect("BTCUSDT", "1m");
    assert!(
        wait_until(|| client.status() == ConnectionStatus::Disconnected, WAIT).await,
        "auth failure should end in disconnected"
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    // One attempt, no blind retries against bad credentials.
    assert_eq!(transport.sessions_opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn switch_instrument_reuses_the_user_session() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    connect_and_wait(&client, &transport).await;
    client.switch_instrument("ETHUSDT", "5m").await.unwrap();

    assert_eq!(client.instrument().symbol, "ETHUSDT");
    assert_eq!(transport.sessions_opened.load(Ordering::SeqCst), 1);
    // Combined resubscription carries the kline stream and the listen key.
    assert_eq!(
        transport.market_streams.lock().last().unwrap().as_slice(),
        &["ethusdt@kline_5m".to_string(), "listen-key-1".to_string()]
    );
}

#[tokio::test]
async fn switched_session_routes_frames_for_the_new_instrument() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);
    let mut candles = client.subscribe_candles();

    connect_and_wait(&client, &transport).await;
    client.switch_instrument("ETHUSDT", "1m").await.unwrap();

    transport.send_market_frame(kline_frame("ETHUSDT", 2_000.5)).await;
    assert_eq!(candles.recv().await.unwrap().close, 2_000.5);
}

#[tokio::test]
async fn failed_switch_reconnects_against_the_new_instrument() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    connect_and_wait(&client, &transport).await;
    transport.market_stream_failures.store(1, Ordering::SeqCst);

    let err = client.switch_instrument("ETHUSDT", "1m").await;
    assert!(err.is_err());

    // The supervisor rebuilds the whole session for the new instrument.
    assert!(
        wait_until(
            || transport.sessions_opened.load(Ordering::SeqCst) >= 2,
            WAIT
        )
        .await,
        "no reconnect after failed switch"
    );
    assert!(wait_until(|| client.status() == ConnectionStatus::Connected, WAIT).await);
    assert_eq!(
        transport.market_streams.lock().last().unwrap().as_slice(),
        &["ethusdt@kline_1m".to_string()]
    );
}

#[tokio::test]
async fn switch_without_session_connects_fresh() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    client.switch_instrument("ETHUSDT", "1m").await.unwrap();
    assert!(wait_until(|| client.status() == ConnectionStatus::Connected, WAIT).await);
    assert_eq!(
        transport.market_streams.lock().as_slice(),
        &[vec!["ethusdt@kline_1m".to_string()]]
    );
}

#[tokio::test]
async fn disconnect_tears_down_and_allows_reconnect() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    connect_and_wait(&client, &transport).await;
    client.disconnect();
    assert!(
        wait_until(|| client.status() == ConnectionStatus::Disconnected, WAIT).await,
        "disconnect never completed"
    );

    client.connect("BTCUSDT", "1m");
    assert!(wait_until(|| client.status() == ConnectionStatus::Connected, WAIT).await);
    assert_eq!(transport.sessions_opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn connect_immediately_after_disconnect_is_not_lost() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    connect_and_wait(&client, &transport).await;

    // No waiting between the two: the connect must land even while the
    // previous supervisor is still winding down.
    client.disconnect();
    client.connect("BTCUSDT", "1m");

    assert!(
        wait_until(|| client.status() == ConnectionStatus::Connected, WAIT).await,
        "connect during wind-down was dropped"
    );
    assert!(
        wait_until(|| !transport.user_senders.lock().is_empty(), WAIT).await,
        "no live user stream after reconnect"
    );
}

#[tokio::test]
async fn disconnect_after_absorbed_connect_still_sticks() {
    init_test_logging();
    let transport = Arc::new(StubTransport::new());
    let client = client_with(&transport);

    connect_and_wait(&client, &transport).await;
    client.disconnect();
    client.connect("BTCUSDT", "1m");
    assert!(wait_until(|| client.status() == ConnectionStatus::Connected, WAIT).await);

    client.disconnect();
    assert!(
        wait_until(|| client.status() == ConnectionStatus::Disconnected, WAIT).await,
        "final disconnect never completed"
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}
