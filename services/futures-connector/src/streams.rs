//! Stream frame routing
//!
//! One router task per session reads raw frames and dispatches by event
//! type: kline payloads update the candle channel, account-affecting
//! events trigger a full reconciliation. Malformed frames are logged and
//! dropped; they never take the session down.

use crate::reconciler::AccountReconciler;
use crate::transport::StreamHandle;
use connector_common::{Candle, StateChannel};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// User-data events that invalidate cached account state
const ACCOUNT_EVENTS: [&str; 3] = ["ACCOUNT_UPDATE", "ORDER_TRADE_UPDATE", "ALGO_UPDATE"];

/// Kline event payload, `k` object of the venue's kline stream
#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "o", with = "connector_common::serde_util::f64_str")]
    open: f64,
    #[serde(rename = "h", with = "connector_common::serde_util::f64_str")]
    high: f64,
    #[serde(rename = "l", with = "connector_common::serde_util::f64_str")]
    low: f64,
    #[serde(rename = "c", with = "connector_common::serde_util::f64_str")]
    close: f64,
    #[serde(rename = "v", with = "connector_common::serde_util::f64_str")]
    volume: f64,
    #[serde(rename = "q", with = "connector_common::serde_util::f64_str")]
    quote_volume: f64,
}

impl From<KlinePayload> for Candle {
    fn from(k: KlinePayload) -> Self {
        Candle {
            open_time: k.open_time,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            close_time: k.close_time,
            quote_volume: k.quote_volume,
        }
    }
}

pub struct StreamRouter {
    candle: Arc<StateChannel<Candle>>,
    reconciler: Arc<AccountReconciler>,
}

impl StreamRouter {
    pub fn new(candle: Arc<StateChannel<Candle>>, reconciler: Arc<AccountReconciler>) -> Self {
        Self { candle, reconciler }
    }

    /// Drain separate market and user subscriptions until either closes.
    ///
    /// Returning means the session is dead and the supervisor should
    /// reconnect.
    pub async fn run_split(&self, mut market: StreamHandle, mut user: StreamHandle) {
        loop {
            tokio::select! {
                frame = market.next_frame() => match frame {
                    Some(frame) => self.handle_frame(&frame).await,
                    None => {
                        warn!("market stream closed");
                        return;
                    }
                },
                frame = user.next_frame() => match frame {
                    Some(frame) => self.handle_frame(&frame).await,
                    None => {
                        warn!("user stream closed");
                        return;
                    }
                },
            }
        }
    }

    /// Drain a single combined subscription carrying both market and user
    /// frames, as produced after an instrument switch.
    pub async fn run_combined(&self, mut stream: StreamHandle) {
        while let Some(frame) = stream.next_frame().await {
            self.handle_frame(&frame).await;
        }
        warn!("combined stream closed");
    }

    async fn handle_frame(&self, frame: &str) {
        let value: serde_json::Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "dropping unparseable frame");
                return;
            }
        };

        // Combined-endpoint frames wrap the event in a "data" envelope.
        let payload = value.get("data").unwrap_or(&value);
        let Some(event) = payload.get("e").and_then(|e| e.as_str()) else {
            debug!("frame without event type");
            return;
        };

        if event == "kline" {
            let Some(k) = payload.get("k") else {
                warn!("kline frame without k payload");
                return;
            };
            match serde_json::from_value::<KlinePayload>(k.clone()) {
                Ok(kline) => {
                    // Every update, in-progress bars included, overwrites
                    // the latest candle.
                    self.candle.publish(kline.into());
                }
                Err(err) => warn!(error = %err, "dropping malformed kline"),
            }
            return;
        }

        if ACCOUNT_EVENTS.contains(&event) {
            debug!(event, "account event, reconciling");
            if let Err(err) = self.reconciler.refresh().await {
                warn!(event, error = %err, "reconciliation after stream event failed");
            }
            return;
        }

        debug!(event, "ignoring stream event");
    }
}
