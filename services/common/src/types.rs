//! Domain types mirroring the venue wire format
//!
//! Field names follow the venue's camelCase JSON; numeric strings are parsed
//! into `f64` at the serde boundary. Timestamps stay as venue epoch
//! milliseconds.

use crate::serde_util::{f64_str, f64_str_opt};
use serde::{Deserialize, Serialize};

/// Connection lifecycle of the venue session.
///
/// A single authoritative instance exists per client; transitions are
/// published in order and deduplicated against the previous value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No session; nothing subscribed
    Disconnected,
    /// Session setup or a reconnect attempt is in flight
    Connecting,
    /// Streams are live and reconciliation is running
    Connected,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that closes what this side opens.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Position side in hedge / one-way mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
    Both,
}

impl PositionSide {
    /// Order side that reduces a position held on this side.
    ///
    /// `Both` (one-way mode) has no fixed closing side; the caller must
    /// derive it from the sign of the position amount.
    #[must_use]
    pub const fn close_side(self) -> Option<OrderSide> {
        match self {
            Self::Long => Some(OrderSide::Sell),
            Self::Short => Some(OrderSide::Buy),
            Self::Both => None,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Both => write!(f, "BOTH"),
        }
    }
}

/// Plain order status as reported by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
}

impl OrderStatus {
    /// Whether the venue still accepts price/quantity amendments.
    #[must_use]
    pub const fn is_amendable(self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

/// Conditional (algo) order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgoStatus {
    New,
    Triggered,
    Canceled,
    Expired,
}

/// Conditional order trigger type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionalType {
    #[serde(rename = "STOP_MARKET")]
    StopMarket,
    #[serde(rename = "TAKE_PROFIT_MARKET")]
    TakeProfitMarket,
    /// Conditional types this engine does not manage (trailing stops etc.)
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ConditionalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopMarket => write!(f, "STOP_MARKET"),
            Self::TakeProfitMarket => write!(f, "TAKE_PROFIT_MARKET"),
            Self::Other => write!(f, "OTHER"),
        }
    }
}

/// Price source for conditional order triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    #[default]
    MarkPrice,
    ContractPrice,
}

/// Latest OHLCV bar for the selected instrument/interval
///
/// Only the most recent value is retained; every kline update (in-progress
/// or closed bar) overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    /// Bar open time, epoch millis
    pub open_time: i64,
    #[serde(with = "f64_str")]
    pub open: f64,
    #[serde(with = "f64_str")]
    pub high: f64,
    #[serde(with = "f64_str")]
    pub low: f64,
    #[serde(with = "f64_str")]
    pub close: f64,
    /// Base-asset volume
    #[serde(with = "f64_str")]
    pub volume: f64,
    /// Bar close time, epoch millis
    pub close_time: i64,
    /// Quote-asset volume
    #[serde(with = "f64_str")]
    pub quote_volume: f64,
}

/// Conditional order mirrored from the venue
///
/// The venue owns these; ids never survive a cancel and the engine only
/// mirrors what the open-orders endpoint reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgoOrder {
    pub algo_id: i64,
    #[serde(default)]
    pub client_algo_id: String,
    /// Always "CONDITIONAL" for the orders this engine manages
    #[serde(default)]
    pub algo_type: String,
    pub order_type: ConditionalType,
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    #[serde(with = "f64_str")]
    pub quantity: f64,
    #[serde(with = "f64_str")]
    pub trigger_price: f64,
    #[serde(default, with = "f64_str_opt")]
    pub price: Option<f64>,
    pub algo_status: AlgoStatus,
    #[serde(default)]
    pub working_type: WorkingType,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub close_position: bool,
    /// Epoch millis
    #[serde(default)]
    pub create_time: i64,
    /// Epoch millis
    #[serde(default)]
    pub update_time: i64,
}

/// Open position with its attached bracket legs
///
/// Materialized only while `position_amt != 0`; rebuilt wholesale on every
/// reconciliation pass, never patched incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub position_side: PositionSide,
    /// Signed size; negative for shorts in one-way mode
    #[serde(with = "f64_str")]
    pub position_amt: f64,
    #[serde(with = "f64_str")]
    pub entry_price: f64,
    #[serde(default, with = "f64_str_opt")]
    pub break_even_price: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub leverage: Option<f64>,
    #[serde(with = "f64_str")]
    pub unrealized_profit: f64,
    #[serde(default, with = "f64_str_opt")]
    pub initial_margin: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub maint_margin: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub position_initial_margin: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub open_order_initial_margin: Option<f64>,
    #[serde(default)]
    pub isolated: bool,
    #[serde(default, with = "f64_str_opt")]
    pub isolated_wallet: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub notional: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub max_notional: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub bid_notional: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub ask_notional: Option<f64>,
    /// Epoch millis
    #[serde(default)]
    pub update_time: i64,
    /// First open STOP_MARKET for (symbol, position side), if any
    #[serde(default)]
    pub stop_loss: Option<AlgoOrder>,
    /// First open TAKE_PROFIT_MARKET for (symbol, position side), if any
    #[serde(default)]
    pub take_profit: Option<AlgoOrder>,
}

/// Account snapshot as returned by the venue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default, with = "f64_str_opt")]
    pub total_wallet_balance: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub total_unrealized_profit: Option<f64>,
    #[serde(default, with = "f64_str_opt")]
    pub available_balance: Option<f64>,
}

/// Exchange-imposed quantity and price constraints for one instrument
///
/// Cached on first lookup and never invalidated during a session; venue
/// rules change rarely and a restart refreshes the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRule {
    pub symbol: String,
    /// Smallest order quantity the venue accepts
    pub min_qty: f64,
    /// Quantity increment
    pub step_size: f64,
    /// Fractional digits of `step_size`, trailing zeros stripped
    pub quantity_precision: u32,
    /// Price increment
    pub tick_size: f64,
    /// Fractional digits of `tick_size`, floored at one so integer ticks
    /// still format with a decimal
    pub price_precision: u32,
}

/// Identifies a plain order by venue id or client id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRef {
    Id(i64),
    ClientId(String),
}

impl std::fmt::Display for OrderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::ClientId(id) => write!(f, "{id}"),
        }
    }
}

/// Acknowledgement for a submitted or amended plain order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

/// Acknowledgement for a submitted conditional order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgoAck {
    pub algo_id: i64,
    #[serde(default)]
    pub client_algo_id: Option<String>,
}

/// Queried state of a plain order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderState {
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub side: OrderSide,
    #[serde(default)]
    pub position_side: Option<PositionSide>,
    #[serde(with = "f64_str")]
    pub price: f64,
    #[serde(rename = "origQty", with = "f64_str")]
    pub orig_qty: f64,
    #[serde(rename = "executedQty", with = "f64_str")]
    pub executed_qty: f64,
    #[serde(default, rename = "type")]
    pub order_type: Option<String>,
    /// Epoch millis
    #[serde(default)]
    pub update_time: i64,
}

/// Identifiers of a placed entry + stop-loss + take-profit group
///
/// Returned once after a successful combined placement; not persisted.
/// Later modifications address the legs individually by algo id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
    pub entry_order_id: String,
    pub stop_loss_algo_id: i64,
    pub take_profit_algo_id: i64,
    /// Normalized quantity shared by all three legs
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_side: PositionSide,
}

/// Which bracket leg an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegKind {
    StopLoss,
    TakeProfit,
}

impl LegKind {
    /// Conditional order type for this leg.
    #[must_use]
    pub const fn conditional_type(self) -> ConditionalType {
        match self {
            Self::StopLoss => ConditionalType::StopMarket,
            Self::TakeProfit => ConditionalType::TakeProfitMarket,
        }
    }
}

/// Stop-loss / take-profit pair currently open for one (symbol, side)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLegs {
    pub stop_loss: Option<AlgoOrder>,
    pub take_profit: Option<AlgoOrder>,
}
