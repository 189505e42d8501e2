//! Connector configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the venue connection and command plumbing
///
/// Credentials are read from the environment; testnet and production use
/// different key pairs. Timing knobs default to the values the engine was
/// tuned with and rarely need changing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// API key for the selected environment
    pub api_key: String,
    /// API secret used for HMAC request signing
    pub api_secret: String,
    /// Connect to the venue testnet instead of production
    pub testnet: bool,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,
    /// Receive window forwarded with signed requests, millis
    pub recv_window_ms: u64,
    /// User-data session keepalive period in seconds; must stay well inside
    /// the venue's server-side expiry window (60 minutes)
    pub keepalive_interval_secs: u64,
    /// Base reconnect delay in milliseconds (grows linearly per attempt)
    pub backoff_base_ms: u64,
    /// Reconnect delay cap in milliseconds
    pub backoff_cap_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: true,
            request_timeout_secs: 10,
            recv_window_ms: 5_000,
            keepalive_interval_secs: 25 * 60,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
        }
    }
}

impl ConnectorConfig {
    /// Build a configuration from environment variables.
    ///
    /// `TESTNET=true` selects `BINANCE_API_KEY`/`BINANCE_API_SECRET`;
    /// otherwise the `_PROD` pair is used, matching the deployment layout.
    #[must_use]
    pub fn from_env() -> Self {
        let testnet = std::env::var("TESTNET")
            .map(|v| v == "true")
            .unwrap_or(true);

        let (key_var, secret_var) = if testnet {
            ("BINANCE_API_KEY", "BINANCE_API_SECRET")
        } else {
            ("BINANCE_API_KEY_PROD", "BINANCE_API_SECRET_PROD")
        };

        Self {
            api_key: std::env::var(key_var).unwrap_or_default(),
            api_secret: std::env::var(secret_var).unwrap_or_default(),
            testnet,
            ..Self::default()
        }
    }

    /// Per-request HTTP timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Keepalive period for the user-data session.
    #[must_use]
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Linear backoff delay for the given attempt number (1-based),
    /// bounded by the configured cap.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_base_ms.saturating_mul(u64::from(attempt));
        Duration::from_millis(delay.min(self.backoff_cap_ms))
    }
}
