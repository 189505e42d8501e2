//! Binance USDS-M futures connectivity and reconciliation engine
//!
//! Maintains a supervised venue session (market klines + user data stream),
//! reconciles account state from REST snapshots on every account-affecting
//! event, and exposes a command surface for sized orders, bracket groups
//! and protective-leg management.
//!
//! Consumers observe three replay-latest channels: connection status,
//! open positions with attached stop/take-profit legs, and the newest
//! candle for the selected instrument.

#![forbid(unsafe_code)]

pub mod binance;
pub mod brackets;
pub mod connection;
pub mod reconciler;
pub mod sizing;
pub mod streams;
pub mod transport;

use binance::BinanceTransport;
use brackets::BracketCoordinator;
use connection::{ConnectionSupervisor, Instrument};
use connector_common::{
    AccountSnapshot, Bracket, Candle, ConnectionStatus, ConnectorConfig, ConnectorError,
    ConnectorResult, LegKind, OpenLegs, OrderAck, OrderRef, OrderSide, OrderState, Position,
    PositionSide, StateChannel, SymbolRule,
};
use reconciler::AccountReconciler;
use sizing::OrderSizer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use transport::VenueTransport;

/// Maximum leverage the venue accepts on any symbol
const MAX_LEVERAGE: u32 = 125;

/// Facade over the connection supervisor, reconciler and order flow
///
/// Cheap to clone; all state is shared behind `Arc`.
#[derive(Clone)]
pub struct FuturesClient {
    transport: Arc<dyn VenueTransport>,
    status: Arc<StateChannel<ConnectionStatus>>,
    positions: Arc<StateChannel<Vec<Position>>>,
    candle: Arc<StateChannel<Candle>>,
    supervisor: Arc<ConnectionSupervisor>,
    coordinator: Arc<BracketCoordinator>,
    sizer: Arc<OrderSizer>,
    reconciler: Arc<AccountReconciler>,
}

impl FuturesClient {
    /// Client backed by the Binance transport.
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        let transport = Arc::new(BinanceTransport::new(config.clone())?);
        Ok(Self::with_transport(transport, config))
    }

    /// Client over an arbitrary transport; the unit and integration tests
    /// drive the engine through this.
    pub fn with_transport(transport: Arc<dyn VenueTransport>, config: ConnectorConfig) -> Self {
        let status = Arc::new(StateChannel::with_initial(ConnectionStatus::Disconnected));
        let positions = Arc::new(StateChannel::with_initial(Vec::new()));
        let candle = Arc::new(StateChannel::new());

        let reconciler = Arc::new(AccountReconciler::new(
            Arc::clone(&transport),
            Arc::clone(&positions),
        ));
        let sizer = Arc::new(OrderSizer::new(Arc::clone(&transport)));
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&transport),
            config,
            Arc::clone(&status),
            Arc::clone(&candle),
            Arc::clone(&reconciler),
        ));
        let coordinator = Arc::new(BracketCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&sizer),
            Arc::clone(&reconciler),
        ));

        Self {
            transport,
            status,
            positions,
            candle,
            supervisor,
            coordinator,
            sizer,
            reconciler,
        }
    }

    // Session lifecycle

    /// Start (or keep) a supervised session for the given instrument.
    pub fn connect(&self, symbol: &str, interval: &str) {
        self.supervisor.connect(symbol, interval);
    }

    /// Tear the session down.
    pub fn disconnect(&self) {
        self.supervisor.disconnect();
    }

    /// Repoint the market subscription at another instrument, keeping the
    /// user-data session when possible.
    pub async fn switch_instrument(&self, symbol: &str, interval: &str) -> ConnectorResult<()> {
        self.supervisor.switch_instrument(symbol, interval).await
    }

    /// Instrument the market subscription currently follows.
    pub fn instrument(&self) -> Instrument {
        self.supervisor.instrument()
    }

    // Observation channels

    /// Subscribe to connection status transitions; the current status is
    /// replayed immediately.
    pub fn subscribe_status(&self) -> mpsc::UnboundedReceiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.get().unwrap_or(ConnectionStatus::Disconnected)
    }

    /// Subscribe to reconciled position sets.
    pub fn subscribe_positions(&self) -> mpsc::UnboundedReceiver<Vec<Position>> {
        self.positions.subscribe()
    }

    /// Latest reconciled position set.
    pub fn positions(&self) -> Vec<Position> {
        self.positions.get().unwrap_or_default()
    }

    /// Subscribe to candle updates for the selected instrument.
    pub fn subscribe_candles(&self) -> mpsc::UnboundedReceiver<Candle> {
        self.candle.subscribe()
    }

    /// Latest candle, if any arrived since connect.
    pub fn latest_candle(&self) -> Option<Candle> {
        self.candle.get()
    }

    // Order flow

    /// MARKET order sized from a quote-currency notional.
    pub async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        usd_amount: f64,
        position_side: PositionSide,
    ) -> ConnectorResult<OrderAck> {
        self.coordinator
            .market_order(symbol, side, usd_amount, position_side)
            .await
    }

    /// GTC LIMIT order sized from a quote-currency notional.
    pub async fn limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        usd_amount: f64,
        price: f64,
        position_side: PositionSide,
    ) -> ConnectorResult<OrderAck> {
        self.coordinator
            .limit_order(symbol, side, usd_amount, price, position_side)
            .await
    }

    /// Amend a live LIMIT order; returns the current state unchanged when
    /// the order can no longer be amended.
    pub async fn modify_limit_order(
        &self,
        symbol: &str,
        order: OrderRef,
        usd_amount: f64,
        price: f64,
    ) -> ConnectorResult<OrderState> {
        self.coordinator
            .modify_limit_order(symbol, order, usd_amount, price)
            .await
    }

    /// Cancel a plain order and return its final state.
    pub async fn cancel_order(&self, symbol: &str, order: OrderRef) -> ConnectorResult<OrderState> {
        self.coordinator.cancel_order(symbol, order).await
    }

    /// LIMIT entry plus STOP_MARKET and TAKE_PROFIT_MARKET legs.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_bracket(
        &self,
        symbol: &str,
        side: OrderSide,
        usd_amount: f64,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        position_side: PositionSide,
    ) -> ConnectorResult<Bracket> {
        self.coordinator
            .place_bracket(
                symbol,
                side,
                usd_amount,
                entry_price,
                stop_loss,
                take_profit,
                position_side,
            )
            .await
    }

    /// Replace the stop-loss leg; returns the new algo id.
    pub async fn modify_stop_loss(
        &self,
        symbol: &str,
        algo_id: i64,
        trigger_price: f64,
        usd_amount: Option<f64>,
        position_side: PositionSide,
    ) -> ConnectorResult<i64> {
        self.coordinator
            .modify_leg(
                symbol,
                algo_id,
                LegKind::StopLoss,
                trigger_price,
                usd_amount,
                position_side,
            )
            .await
    }

    /// Replace the take-profit leg; returns the new algo id.
    pub async fn modify_take_profit(
        &self,
        symbol: &str,
        algo_id: i64,
        trigger_price: f64,
        usd_amount: Option<f64>,
        position_side: PositionSide,
    ) -> ConnectorResult<i64> {
        self.coordinator
            .modify_leg(
                symbol,
                algo_id,
                LegKind::TakeProfit,
                trigger_price,
                usd_amount,
                position_side,
            )
            .await
    }

    /// Cancel a protective leg; an already-gone leg counts as success.
    pub async fn cancel_leg(&self, algo_id: i64) -> ConnectorResult<()> {
        self.coordinator.cancel_leg(algo_id).await
    }

    /// Close an open position at market; `Ok(None)` when already flat.
    pub async fn force_close(
        &self,
        symbol: &str,
        position_side: PositionSide,
    ) -> ConnectorResult<Option<OrderAck>> {
        self.coordinator.force_close(symbol, position_side).await
    }

    // Account configuration

    /// Put the account in hedge (dual-side) position mode. Already being
    /// in hedge mode counts as success.
    pub async fn enable_hedge_mode(&self) -> ConnectorResult<()> {
        match self.transport.set_position_mode(true).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_in_state() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Set initial leverage for a symbol.
    ///
    /// Already-set leverage counts as success; a bracket-tier rejection is
    /// logged and swallowed so strategy startup survives tier limits.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> ConnectorResult<()> {
        if leverage == 0 || leverage > MAX_LEVERAGE {
            return Err(ConnectorError::Validation {
                reason: format!("leverage {leverage} outside 1..={MAX_LEVERAGE}"),
            });
        }
        match self.transport.set_leverage(symbol, leverage).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_in_state() => Ok(()),
            Err(ConnectorError::Venue { code, message })
                if code == connector_common::errors::CODE_LEVERAGE_UNAVAILABLE =>
            {
                warn!(symbol, leverage, %message, "leverage tier unavailable, keeping current");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // Market data queries

    /// Historical candles straight from REST.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ConnectorResult<Vec<Candle>> {
        self.transport.fetch_klines(symbol, interval, limit).await
    }

    /// Last traded price for a symbol.
    pub async fn last_price(&self, symbol: &str) -> ConnectorResult<f64> {
        self.transport.fetch_last_price(symbol).await
    }

    /// Raw account snapshot, unfiltered.
    pub async fn account_snapshot(&self) -> ConnectorResult<AccountSnapshot> {
        self.transport.fetch_account_snapshot().await
    }

    /// Lot-size and tick-size rules for a symbol, cached after first fetch.
    pub async fn symbol_rules(&self, symbol: &str) -> ConnectorResult<SymbolRule> {
        self.sizer.rules(symbol).await
    }

    /// Protective legs currently guarding a (symbol, position side).
    pub async fn open_legs(&self, symbol: &str, position_side: PositionSide) -> OpenLegs {
        self.reconciler.open_legs(symbol, position_side).await
    }
}
