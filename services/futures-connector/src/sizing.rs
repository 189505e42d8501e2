//! Order sizing against venue precision rules
//!
//! The sizer owns the symbol rule cache and is the single place quantities
//! and prices are made venue-legal. Quantities are always floored to the
//! step size, never rounded up, so a sized order can never exceed the
//! requested notional.

use crate::transport::VenueTransport;
use connector_common::{ConnectorError, ConnectorResult, SymbolRule};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

const LOT_SIZE_FILTER: &str = "LOT_SIZE";
const PRICE_FILTER: &str = "PRICE_FILTER";

/// Fractional digits of a wire decimal with trailing zeros stripped.
///
/// "0.0010" -> 3, "1" -> 0, "1.00" -> 0.
fn fractional_digits(value: &str) -> u32 {
    match value.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

/// Decimal places of a wire tick size, floored at one.
///
/// Derived from the wire string, not the parsed float: a tick like "0.25"
/// carries two decimals that no power-of-ten arithmetic recovers. Integer
/// ticks still format with one decimal so a valid integer price is never
/// truncated below its own precision.
fn price_decimals(tick_size: &str) -> u32 {
    fractional_digits(tick_size).max(1)
}

/// Converts desired notionals/quantities into venue-legal values
pub struct OrderSizer {
    transport: Arc<dyn VenueTransport>,
    cache: RwLock<FxHashMap<String, SymbolRule>>,
}

impl OrderSizer {
    pub fn new(transport: Arc<dyn VenueTransport>) -> Self {
        Self {
            transport,
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Resolve the trading rules for a symbol, fetching instrument metadata
    /// on the first lookup. Entries are never invalidated during a session.
    pub async fn rules(&self, symbol: &str) -> ConnectorResult<SymbolRule> {
        if let Some(rule) = self.cache.read().get(symbol) {
            return Ok(rule.clone());
        }

        let metadata = self.transport.fetch_instrument_metadata().await?;
        let instrument = metadata
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ConnectorError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;

        let lot = instrument
            .filters
            .iter()
            .find(|f| f.filter_type == LOT_SIZE_FILTER);
        let price = instrument
            .filters
            .iter()
            .find(|f| f.filter_type == PRICE_FILTER);

        let (Some(lot), Some(price)) = (lot, price) else {
            return Err(ConnectorError::FilterMissing {
                symbol: symbol.to_string(),
            });
        };
        let (Some(min_qty), Some(step_size), Some(tick_size)) =
            (&lot.min_qty, &lot.step_size, &price.tick_size)
        else {
            return Err(ConnectorError::FilterMissing {
                symbol: symbol.to_string(),
            });
        };

        let rule = SymbolRule {
            symbol: symbol.to_string(),
            min_qty: min_qty.parse::<f64>().map_err(|_| {
                ConnectorError::FilterMissing {
                    symbol: symbol.to_string(),
                }
            })?,
            step_size: step_size.parse::<f64>().map_err(|_| {
                ConnectorError::FilterMissing {
                    symbol: symbol.to_string(),
                }
            })?,
            quantity_precision: fractional_digits(step_size),
            tick_size: tick_size.parse::<f64>().map_err(|_| {
                ConnectorError::FilterMissing {
                    symbol: symbol.to_string(),
                }
            })?,
            price_precision: price_decimals(tick_size),
        };

        info!(
            symbol,
            min_qty = rule.min_qty,
            step_size = rule.step_size,
            precision = rule.quantity_precision,
            tick_size = rule.tick_size,
            "cached symbol rules"
        );
        self.cache.write().insert(symbol.to_string(), rule.clone());
        Ok(rule)
    }

    /// Floor a desired quantity to the rule's step size.
    ///
    /// The result is always an exact step multiple and never larger than
    /// the input; a floored value below the venue minimum fails.
    pub fn normalize_quantity(&self, rule: &SymbolRule, desired: f64) -> ConnectorResult<f64> {
        if !desired.is_finite() || desired < 0.0 {
            return Err(ConnectorError::Validation {
                reason: format!("invalid quantity {desired} for {}", rule.symbol),
            });
        }
        // The epsilon keeps exact step multiples from flooring one step
        // short (0.157 / 0.001 evaluates just below 157).
        let steps = (desired / rule.step_size + 1e-9).floor();
        let quantity = round_to_decimals(steps * rule.step_size, rule.quantity_precision);
        if quantity < rule.min_qty {
            return Err(ConnectorError::QuantityTooSmall {
                symbol: rule.symbol.clone(),
                quantity,
                min_qty: rule.min_qty,
            });
        }
        Ok(quantity)
    }

    /// Round a price to the rule's tick size.
    pub fn normalize_price(&self, rule: &SymbolRule, price: f64) -> ConnectorResult<f64> {
        if !price.is_finite() || price <= 0.0 {
            return Err(ConnectorError::Validation {
                reason: format!("invalid price {price} for {}", rule.symbol),
            });
        }
        let ticks = (price / rule.tick_size).round();
        Ok(round_to_decimals(ticks * rule.tick_size, rule.price_precision))
    }

    /// Size a quote-currency notional into a venue-legal quantity.
    ///
    /// Used uniformly by market orders, limit orders, modifications and
    /// bracket legs.
    pub fn quantity_from_notional(
        &self,
        rule: &SymbolRule,
        usd_amount: f64,
        price: f64,
    ) -> ConnectorResult<f64> {
        if !price.is_finite() || price <= 0.0 {
            return Err(ConnectorError::Validation {
                reason: format!("invalid price {price} for {}", rule.symbol),
            });
        }
        debug!(
            symbol = %rule.symbol,
            usd_amount,
            price,
            "sizing order from notional"
        );
        self.normalize_quantity(rule, usd_amount / price)
    }

    /// Wire representation of a normalized quantity.
    #[must_use]
    pub fn format_quantity(&self, rule: &SymbolRule, quantity: f64) -> String {
        format!("{quantity:.prec$}", prec = rule.quantity_precision as usize)
    }

    /// Wire representation of a normalized price.
    #[must_use]
    pub fn format_price(&self, rule: &SymbolRule, price: f64) -> String {
        format!("{price:.prec$}", prec = rule.price_precision as usize)
    }
}

fn round_to_decimals(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
