//! Account state reconciliation
//!
//! Exchange REST state is the single source of truth. Every stream event
//! that hints at account change triggers a full refetch here; nothing is
//! patched incrementally from event payloads.

use crate::transport::VenueTransport;
use connector_common::{
    ConditionalType, ConnectorError, ConnectorResult, OpenLegs, Position, PositionSide,
    StateChannel,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Rebuilds the published position set from venue snapshots
pub struct AccountReconciler {
    transport: Arc<dyn VenueTransport>,
    positions: Arc<StateChannel<Vec<Position>>>,
}

impl AccountReconciler {
    pub fn new(
        transport: Arc<dyn VenueTransport>,
        positions: Arc<StateChannel<Vec<Position>>>,
    ) -> Self {
        Self {
            transport,
            positions,
        }
    }

    /// Fetch the account snapshot, attach protective legs to each open
    /// position and publish the result atomically.
    ///
    /// Concurrent calls are safe: each builds its own candidate list and
    /// the later publish wins. Failures degrade to an empty position set
    /// rather than leaving stale state visible; only authorization errors
    /// propagate to the caller.
    pub async fn refresh(&self) -> ConnectorResult<()> {
        let snapshot = match self.transport.fetch_account_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err @ ConnectorError::Authorization { .. }) => {
                warn!(error = %err, "account snapshot rejected, clearing positions");
                self.positions.publish(Vec::new());
                return Err(err);
            }
            Err(err) => {
                warn!(error = %err, "account snapshot failed, clearing positions");
                self.positions.publish(Vec::new());
                return Ok(());
            }
        };

        let mut open: Vec<Position> = snapshot
            .positions
            .into_iter()
            .filter(|p| p.position_amt.is_finite() && p.position_amt != 0.0)
            .collect();

        for position in &mut open {
            let legs = self
                .open_legs(&position.symbol, position.position_side)
                .await;
            position.stop_loss = legs.stop_loss;
            position.take_profit = legs.take_profit;
        }

        debug!(count = open.len(), "publishing reconciled positions");
        self.positions.publish(open);
        Ok(())
    }

    /// Locate the protective legs guarding a (symbol, position side).
    ///
    /// The first open STOP_MARKET and TAKE_PROFIT_MARKET matching the
    /// position side are taken; a lookup failure leaves the position
    /// unguarded rather than failing the caller.
    pub async fn open_legs(&self, symbol: &str, position_side: PositionSide) -> OpenLegs {
        let orders = match self.transport.fetch_open_conditional_orders(symbol).await {
            Ok(orders) => orders,
            Err(err) => {
                warn!(
                    symbol,
                    error = %err,
                    "conditional order lookup failed, position shown unguarded"
                );
                return OpenLegs::default();
            }
        };

        let mut legs = OpenLegs::default();
        for order in orders {
            if order.position_side != position_side {
                continue;
            }
            match order.order_type {
                ConditionalType::StopMarket if legs.stop_loss.is_none() => {
                    legs.stop_loss = Some(order);
                }
                ConditionalType::TakeProfitMarket if legs.take_profit.is_none() => {
                    legs.take_profit = Some(order);
                }
                _ => {}
            }
        }
        legs
    }
}
