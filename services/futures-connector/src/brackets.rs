//! Order placement and bracket coordination
//!
//! All order flow goes through here: plain market/limit orders, the
//! entry + stop-loss + take-profit bracket group, leg replacement and
//! forced position close. Placement is sequential and non-transactional;
//! a failed leg leaves earlier legs standing and surfaces the error.

use crate::reconciler::AccountReconciler;
use crate::sizing::OrderSizer;
use crate::transport::{
    AmendOrderParams, ConditionalOrderParams, OrderParams, VenueTransport,
};
use connector_common::{
    Bracket, ConnectorError, ConnectorResult, LegKind, OrderAck, OrderRef, OrderSide, OrderState,
    Position, PositionSide, WorkingType,
};
use std::sync::Arc;
use tracing::{info, warn};

pub struct BracketCoordinator {
    transport: Arc<dyn VenueTransport>,
    sizer: Arc<OrderSizer>,
    reconciler: Arc<AccountReconciler>,
}

impl BracketCoordinator {
    pub fn new(
        transport: Arc<dyn VenueTransport>,
        sizer: Arc<OrderSizer>,
        reconciler: Arc<AccountReconciler>,
    ) -> Self {
        Self {
            transport,
            sizer,
            reconciler,
        }
    }

    /// Submit a MARKET order sized from a quote-currency notional.
    ///
    /// The last traded price is fetched to size the quantity; the venue
    /// fills at its own price.
    pub async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        usd_amount: f64,
        position_side: PositionSide,
    ) -> ConnectorResult<OrderAck> {
        let rule = self.sizer.rules(symbol).await?;
        let price = self.last_price(symbol).await?;
        let quantity = self.sizer.quantity_from_notional(&rule, usd_amount, price)?;

        let ack = self
            .transport
            .submit_order(OrderParams {
                symbol: symbol.to_string(),
                side,
                order_type: "MARKET",
                quantity: self.sizer.format_quantity(&rule, quantity),
                price: None,
                time_in_force: None,
                position_side,
                new_client_order_id: None,
            })
            .await?;
        info!(symbol, %side, quantity, order_id = ack.order_id, "market order submitted");
        Ok(ack)
    }

    /// Submit a GTC LIMIT order sized from a quote-currency notional at the
    /// given price.
    pub async fn limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        usd_amount: f64,
        price: f64,
        position_side: PositionSide,
    ) -> ConnectorResult<OrderAck> {
        let rule = self.sizer.rules(symbol).await?;
        let price = self.sizer.normalize_price(&rule, price)?;
        let quantity = self.sizer.quantity_from_notional(&rule, usd_amount, price)?;

        let ack = self
            .transport
            .submit_order(OrderParams {
                symbol: symbol.to_string(),
                side,
                order_type: "LIMIT",
                quantity: self.sizer.format_quantity(&rule, quantity),
                price: Some(self.sizer.format_price(&rule, price)),
                time_in_force: Some("GTC"),
                position_side,
                new_client_order_id: None,
            })
            .await?;
        info!(symbol, %side, quantity, price, order_id = ack.order_id, "limit order submitted");
        Ok(ack)
    }

    /// Amend a live LIMIT order's price and quantity.
    ///
    /// If the order is no longer amendable (filled, canceled, expired) its
    /// current state is returned unchanged instead of an error; the caller
    /// learns the race outcome from the returned status.
    pub async fn modify_limit_order(
        &self,
        symbol: &str,
        order: OrderRef,
        usd_amount: f64,
        price: f64,
    ) -> ConnectorResult<OrderState> {
        let current = self.transport.query_order(symbol, &order).await?;
        if !current.status.is_amendable() {
            warn!(
                symbol,
                order = %order,
                status = ?current.status,
                "order no longer amendable, returning current state"
            );
            return Ok(current);
        }

        let rule = self.sizer.rules(symbol).await?;
        let price = self.sizer.normalize_price(&rule, price)?;
        let quantity = self.sizer.quantity_from_notional(&rule, usd_amount, price)?;

        // The venue requires the original side on amendments.
        let state = self
            .transport
            .amend_order(AmendOrderParams {
                symbol: symbol.to_string(),
                order,
                side: current.side,
                quantity: self.sizer.format_quantity(&rule, quantity),
                price: self.sizer.format_price(&rule, price),
                new_client_order_id: None,
            })
            .await?;
        info!(symbol, order_id = state.order_id, quantity, price, "limit order amended");
        Ok(state)
    }

    /// Place a LIMIT entry with protective STOP_MARKET and
    /// TAKE_PROFIT_MARKET legs sharing the entry quantity.
    ///
    /// The three submissions run in order; there is no rollback. A stop
    /// failure leaves the entry live, a take-profit failure leaves entry
    /// and stop live, and the error propagates so the caller can repair.
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
        let rule = self.sizer.rules(symbol).await?;
        let entry_price = self.sizer.normalize_price(&rule, entry_price)?;
        let stop_loss = self.sizer.normalize_price(&rule, stop_loss)?;
        let take_profit = self.sizer.normalize_price(&rule, take_profit)?;
        let quantity = self
            .sizer
            .quantity_from_notional(&rule, usd_amount, entry_price)?;
        let quantity_str = self.sizer.format_quantity(&rule, quantity);

        let entry_client_id = format!("s_{}", now_millis());
        let entry: OrderAck = self
            .transport
            .submit_order(OrderParams {
                symbol: symbol.to_string(),
                side,
                order_type: "LIMIT",
                quantity: quantity_str.clone(),
                price: Some(self.sizer.format_price(&rule, entry_price)),
                time_in_force: Some("GTC"),
                position_side,
                new_client_order_id: Some(entry_client_id),
            })
            .await?;
        info!(symbol, order_id = entry.order_id, quantity, entry_price, "bracket entry placed");

        let exit_side = side.opposite();
        let stop = self
            .transport
            .submit_conditional_order(ConditionalOrderParams {
                symbol: symbol.to_string(),
                side: exit_side,
                order_type: LegKind::StopLoss.conditional_type(),
                quantity: quantity_str.clone(),
                trigger_price: self.sizer.format_price(&rule, stop_loss),
                working_type: WorkingType::MarkPrice,
                position_side,
                new_client_algo_id: None,
            })
            .await?;
        info!(symbol, algo_id = stop.algo_id, stop_loss, "bracket stop-loss placed");

        let take = self
            .transport
            .submit_conditional_order(ConditionalOrderParams {
                symbol: symbol.to_string(),
                side: exit_side,
                order_type: LegKind::TakeProfit.conditional_type(),
                quantity: quantity_str,
                trigger_price: self.sizer.format_price(&rule, take_profit),
                working_type: WorkingType::MarkPrice,
                position_side,
                new_client_algo_id: None,
            })
            .await?;
        info!(symbol, algo_id = take.algo_id, take_profit, "bracket take-profit placed");

        Ok(Bracket {
            // Bracket callers address the entry by its client order id.
            entry_order_id: if entry.client_order_id.is_empty() {
                entry.order_id.to_string()
            } else {
                entry.client_order_id.clone()
            },
            stop_loss_algo_id: stop.algo_id,
            take_profit_algo_id: take.algo_id,
            quantity,
            entry_price,
            stop_loss,
            take_profit,
            position_side,
        })
    }

    /// Replace a protective leg with a new trigger price and optional new
    /// notional. The venue has no conditional-order amendment, so this is
    /// cancel-then-recreate; the old leg is gone before the new one exists
    /// and the replacement carries a fresh algo id.
    pub async fn modify_leg(
        &self,
        symbol: &str,
        algo_id: i64,
        kind: LegKind,
        trigger_price: f64,
        usd_amount: Option<f64>,
        position_side: PositionSide,
    ) -> ConnectorResult<i64> {
        if algo_id <= 0 {
            return Err(ConnectorError::Validation {
                reason: format!("invalid algo id {algo_id}"),
            });
        }
        let side = position_side
            .close_side()
            .ok_or_else(|| ConnectorError::Validation {
                reason: "leg replacement requires an explicit LONG or SHORT position side"
                    .to_string(),
            })?;

        let rule = self.sizer.rules(symbol).await?;
        let trigger_price = self.sizer.normalize_price(&rule, trigger_price)?;
        let quantity = match usd_amount {
            // Notional converts at the market price, not the trigger; the
            // trigger may sit far from where the position trades.
            Some(usd) => {
                let market_price = self.last_price(symbol).await?;
                self.sizer
                    .quantity_from_notional(&rule, usd, market_price)?
            }
            None => {
                let position = self
                    .find_position(symbol, position_side)
                    .await?
                    .ok_or_else(|| ConnectorError::NotFound {
                        what: format!("position {symbol} {position_side}"),
                    })?;
                self.sizer
                    .normalize_quantity(&rule, position.position_amt.abs())?
            }
        };

        self.transport.cancel_conditional_order(algo_id).await?;

        let client_algo_id = format!(
            "mod_{}_{}",
            kind.conditional_type().to_string().to_lowercase(),
            now_millis()
        );
        let ack = self
            .transport
            .submit_conditional_order(ConditionalOrderParams {
                symbol: symbol.to_string(),
                side,
                order_type: kind.conditional_type(),
                quantity: self.sizer.format_quantity(&rule, quantity),
                trigger_price: self.sizer.format_price(&rule, trigger_price),
                working_type: WorkingType::MarkPrice,
                position_side,
                new_client_algo_id: Some(client_algo_id),
            })
            .await?;
        info!(
            symbol,
            old_algo_id = algo_id,
            new_algo_id = ack.algo_id,
            trigger_price,
            quantity,
            "protective leg replaced"
        );
        if let Err(err) = self.reconciler.refresh().await {
            warn!(error = %err, "refresh after leg replacement failed");
        }
        Ok(ack.algo_id)
    }

    /// Cancel a protective leg.
    ///
    /// An unknown algo id is success: the leg already triggered or was
    /// canceled, and either way it no longer guards the position.
    pub async fn cancel_leg(&self, algo_id: i64) -> ConnectorResult<()> {
        match self.transport.cancel_conditional_order(algo_id).await {
            Ok(()) => Ok(()),
            Err(ConnectorError::NotFound { what }) => {
                info!(algo_id, %what, "leg already gone, treating cancel as success");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Cancel a plain order and return its final state.
    pub async fn cancel_order(
        &self,
        symbol: &str,
        order: OrderRef,
    ) -> ConnectorResult<OrderState> {
        self.transport.cancel_order(symbol, &order).await
    }

    /// Close an open position at market with the full signed amount.
    ///
    /// Returns `Ok(None)` when the position is already flat. Quantity is
    /// sent at full precision rather than floored to the step size, so
    /// residual dust below one step never accumulates.
    pub async fn force_close(
        &self,
        symbol: &str,
        position_side: PositionSide,
    ) -> ConnectorResult<Option<OrderAck>> {
        let Some(position) = self.find_position(symbol, position_side).await? else {
            info!(symbol, %position_side, "no open position, nothing to close");
            return Ok(None);
        };

        let side = if position.position_amt > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let ack = self
            .transport
            .submit_order(OrderParams {
                symbol: symbol.to_string(),
                side,
                order_type: "MARKET",
                quantity: format!("{:.8}", position.position_amt.abs()),
                price: None,
                time_in_force: None,
                position_side,
                new_client_order_id: None,
            })
            .await?;
        info!(
            symbol,
            %side,
            amount = position.position_amt,
            order_id = ack.order_id,
            "position force-closed"
        );
        if let Err(err) = self.reconciler.refresh().await {
            warn!(error = %err, "refresh after force close failed");
        }
        Ok(Some(ack))
    }

    async fn last_price(&self, symbol: &str) -> ConnectorResult<f64> {
        let price = self.transport.fetch_last_price(symbol).await?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ConnectorError::Validation {
                reason: format!("venue returned unusable price {price} for {symbol}"),
            });
        }
        Ok(price)
    }

    /// Fresh position lookup straight from the venue; the published channel
    /// may lag behind a fill that just happened.
    async fn find_position(
        &self,
        symbol: &str,
        position_side: PositionSide,
    ) -> ConnectorResult<Option<Position>> {
        let snapshot = self.transport.fetch_account_snapshot().await?;
        Ok(snapshot
            .positions
            .into_iter()
            .find(|p| {
                p.symbol == symbol
                    && p.position_side == position_side
                    && p.position_amt.is_finite()
                    && p.position_amt != 0.0
            }))
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
