//! Error taxonomy for the futures connectivity engine

use thiserror::Error;

/// Venue error code: invalid API key / IP / permissions
pub const CODE_INVALID_KEY: i64 = -2015;
/// Venue error code: invalid request signature
pub const CODE_INVALID_SIGNATURE: i64 = -1022;
/// Venue error code: conditional order does not exist (often already triggered)
pub const CODE_ALGO_NOT_FOUND: i64 = -4024;
/// Venue error code: account/symbol already in the requested state
pub const CODE_NO_NEED_TO_CHANGE: i64 = -4059;
/// Venue error code: leverage not available for the symbol's bracket tier
pub const CODE_LEVERAGE_UNAVAILABLE: i64 = -4141;
/// Venue error code: position side does not match the account position mode
pub const CODE_POSITION_SIDE_MISMATCH: i64 = -4061;
/// Venue error code: unknown order
pub const CODE_ORDER_NOT_FOUND: i64 = -2013;

/// Connector error taxonomy
///
/// Validation errors are rejected before any network call. Venue rejections
/// are classified by code: authorization-class codes are fatal to the
/// session, benign already-in-state codes are swallowed at call sites, and
/// unknown codes propagate to the caller.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Session or stream establishment failed; the supervisor retries these
    #[error("connection setup failed at {stage}: {reason}")]
    SetupFailure {
        /// Which setup step failed (listen key, market stream, user stream)
        stage: &'static str,
        /// Underlying failure description
        reason: String,
    },

    /// Venue rejected the request with an error code
    #[error("venue error {code}: {message}")]
    Venue {
        /// Venue error code
        code: i64,
        /// Venue error message
        message: String,
    },

    /// Rejected locally before reaching the network
    #[error("validation failed: {reason}")]
    Validation {
        /// Why the request is invalid
        reason: String,
    },

    /// Normalized quantity fell below the venue minimum
    #[error("quantity {quantity} below minimum {min_qty} for {symbol}")]
    QuantityTooSmall {
        symbol: String,
        quantity: f64,
        min_qty: f64,
    },

    /// Instrument absent from the venue's published instrument list
    #[error("symbol {symbol} not found on the venue")]
    SymbolNotFound { symbol: String },

    /// LOT_SIZE or PRICE_FILTER missing from instrument metadata
    #[error("required filters missing for {symbol}")]
    FilterMissing { symbol: String },

    /// Bad credentials or signature; fatal, never blindly retried
    #[error("authorization failed ({code}): {message}")]
    Authorization { code: i64, message: String },

    /// Unknown order / algo order / position
    #[error("{what} not found")]
    NotFound { what: String },

    /// Order is not in an amendable status
    #[error("order {order_id} is {status} and cannot be modified")]
    StateConflict { order_id: String, status: String },

    /// HTTP / WebSocket / serialization plumbing failure
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl ConnectorError {
    /// Classify a venue rejection by its error code.
    #[must_use]
    pub fn from_venue_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            CODE_INVALID_KEY | CODE_INVALID_SIGNATURE => Self::Authorization { code, message },
            CODE_ALGO_NOT_FOUND => Self::NotFound {
                what: format!("algo order ({message})"),
            },
            CODE_ORDER_NOT_FOUND => Self::NotFound {
                what: format!("order ({message})"),
            },
            _ => Self::Venue { code, message },
        }
    }

    /// Whether this is an already-in-desired-state rejection that callers
    /// treat as success (hedge mode already on, leverage already set).
    #[must_use]
    pub fn is_already_in_state(&self) -> bool {
        matches!(self, Self::Venue { code, .. } if *code == CODE_NO_NEED_TO_CHANGE)
    }

    /// Whether the failure is fatal to the whole session. Fatal errors stop
    /// the reconnect loop instead of backing off and retrying.
    #[must_use]
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }
}

/// Result alias for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;
