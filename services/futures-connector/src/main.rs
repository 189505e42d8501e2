//! Futures Connector Service
//!
//! Connects to Binance USDS-M futures, keeps the session alive across
//! stream failures and logs connection status, positions and candles as
//! they change. Credentials and environment come from `.env` / process
//! environment.

use anyhow::Result;
use connector_common::ConnectorConfig;
use futures_connector::FuturesClient;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SYMBOL: &str = "BTCUSDT";
const DEFAULT_INTERVAL: &str = "1m";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "futures_connector=info,connector_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ConnectorConfig::from_env();
    let symbol = std::env::var("SYMBOL").unwrap_or_else(|_| DEFAULT_SYMBOL.to_string());
    let interval = std::env::var("INTERVAL").unwrap_or_else(|_| DEFAULT_INTERVAL.to_string());

    info!(
        symbol,
        interval,
        testnet = config.testnet,
        "starting futures connector"
    );

    let client = FuturesClient::new(config)?;
    let mut status = client.subscribe_status();
    let mut positions = client.subscribe_positions();
    let mut candles = client.subscribe_candles();

    client.connect(&symbol, &interval);

    loop {
        tokio::select! {
            Some(status) = status.recv() => {
                info!(?status, "connection status");
            }
            Some(positions) = positions.recv() => {
                info!(count = positions.len(), "positions reconciled");
                for position in &positions {
                    info!(
                        symbol = %position.symbol,
                        side = %position.position_side,
                        amount = position.position_amt,
                        entry = position.entry_price,
                        guarded = position.stop_loss.is_some() && position.take_profit.is_some(),
                        "open position"
                    );
                }
            }
            Some(candle) = candles.recv() => {
                info!(close = candle.close, volume = candle.volume, "candle update");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                client.disconnect();
                break;
            }
        }
    }

    Ok(())
}
