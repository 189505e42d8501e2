//! Venue transport seam
//!
//! Everything the engine needs from the venue is expressed as the
//! [`VenueTransport`] trait: REST capabilities plus stream opening. The
//! production implementation lives in [`crate::binance`]; tests drive the
//! engine through a scripted in-memory transport.

use async_trait::async_trait;
use connector_common::{
    AccountSnapshot, AlgoAck, AlgoOrder, Candle, ConditionalType, ConnectorResult, OrderAck,
    OrderRef, OrderSide, OrderState, PositionSide, WorkingType,
};
use serde::Deserialize;
use tokio::sync::mpsc;

/// Parameters for a plain MARKET or LIMIT order
///
/// Quantity and price are pre-formatted strings at venue precision; the
/// sizer is the only producer of these values.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderParams {
    pub symbol: String,
    pub side: OrderSide,
    /// "MARKET" or "LIMIT"
    pub order_type: &'static str,
    pub quantity: String,
    /// Required for LIMIT orders, absent for MARKET
    pub price: Option<String>,
    /// Time in force, "GTC" for limit orders
    pub time_in_force: Option<&'static str>,
    pub position_side: PositionSide,
    pub new_client_order_id: Option<String>,
}

/// Parameters for a conditional (algo) order
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalOrderParams {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: ConditionalType,
    pub quantity: String,
    pub trigger_price: String,
    pub working_type: WorkingType,
    pub position_side: PositionSide,
    pub new_client_algo_id: Option<String>,
}

/// Parameters for amending a live LIMIT order
#[derive(Debug, Clone, PartialEq)]
pub struct AmendOrderParams {
    pub symbol: String,
    pub order: OrderRef,
    /// Original order side; the venue requires it on amendments
    pub side: OrderSide,
    pub quantity: String,
    pub price: String,
    pub new_client_order_id: Option<String>,
}

/// Instrument metadata published by the venue
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<InstrumentInfo>,
}

/// One instrument's entry in the exchange information payload
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<InstrumentFilter>,
}

/// A single venue filter; step/tick values stay as wire strings so
/// precision can be derived from their fractional digits.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentFilter {
    pub filter_type: String,
    #[serde(default)]
    pub min_qty: Option<String>,
    #[serde(default)]
    pub step_size: Option<String>,
    #[serde(default)]
    pub tick_size: Option<String>,
}

/// An open streaming subscription
///
/// Frames are raw text payloads; dropping the handle aborts the underlying
/// read pump, which is how subscriptions are released.
pub struct StreamHandle {
    frames: mpsc::Receiver<String>,
    _closer: Option<StreamCloser>,
}

impl StreamHandle {
    /// Handle over a plain channel, used by in-memory test transports.
    #[must_use]
    pub fn new(frames: mpsc::Receiver<String>) -> Self {
        Self {
            frames,
            _closer: None,
        }
    }

    /// Handle whose drop aborts the producing task.
    #[must_use]
    pub fn with_closer(frames: mpsc::Receiver<String>, closer: StreamCloser) -> Self {
        Self {
            frames,
            _closer: Some(closer),
        }
    }

    /// Next raw frame; `None` once the subscription is closed.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Aborts the stream's read pump when dropped
pub struct StreamCloser(tokio::task::JoinHandle<()>);

impl StreamCloser {
    #[must_use]
    pub fn new(pump: tokio::task::JoinHandle<()>) -> Self {
        Self(pump)
    }
}

impl Drop for StreamCloser {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Black-box venue capabilities consumed by the engine
///
/// All calls may run concurrently against one venue session; the venue is
/// the serialization point, not this trait.
#[async_trait]
pub trait VenueTransport: Send + Sync {
    /// Open a user-data session and return its listen key.
    async fn open_user_session(&self) -> ConnectorResult<String>;

    /// Extend the server-side expiry of a user-data session.
    async fn keepalive_session(&self, listen_key: &str) -> ConnectorResult<()>;

    /// Submit a plain order.
    async fn submit_order(&self, params: OrderParams) -> ConnectorResult<OrderAck>;

    /// Submit a conditional (stop / take-profit) order.
    async fn submit_conditional_order(
        &self,
        params: ConditionalOrderParams,
    ) -> ConnectorResult<AlgoAck>;

    /// Amend a live LIMIT order's price/quantity.
    async fn amend_order(&self, params: AmendOrderParams) -> ConnectorResult<OrderState>;

    /// Cancel a plain order; returns its final state.
    async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> ConnectorResult<OrderState>;

    /// Cancel a conditional order by algo id.
    async fn cancel_conditional_order(&self, algo_id: i64) -> ConnectorResult<()>;

    /// Query a plain order's current state.
    async fn query_order(&self, symbol: &str, order: &OrderRef) -> ConnectorResult<OrderState>;

    /// Full account snapshot (balances and raw positions).
    async fn fetch_account_snapshot(&self) -> ConnectorResult<AccountSnapshot>;

    /// Open conditional orders for one symbol.
    async fn fetch_open_conditional_orders(&self, symbol: &str)
    -> ConnectorResult<Vec<AlgoOrder>>;

    /// Venue instrument metadata (filters for every listed symbol).
    async fn fetch_instrument_metadata(&self) -> ConnectorResult<ExchangeInfo>;

    /// Last traded price from the 24h ticker.
    async fn fetch_last_price(&self, symbol: &str) -> ConnectorResult<f64>;

    /// Historical candles.
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ConnectorResult<Vec<Candle>>;

    /// Change initial leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ConnectorResult<()>;

    /// Switch the account between one-way and hedge position mode.
    async fn set_position_mode(&self, dual_side: bool) -> ConnectorResult<()>;

    /// Open a market-data subscription over the given stream names.
    async fn open_market_stream(&self, streams: &[String]) -> ConnectorResult<StreamHandle>;

    /// Open the user-data subscription for a listen key.
    async fn open_user_stream(&self, listen_key: &str) -> ConnectorResult<StreamHandle>;
}
