//! Shared types and utilities for the futures connectivity engine
//!
//! Domain types mirroring the venue wire format, the connector error
//! taxonomy, configuration, and the replay-latest observation channels
//! used to expose candle/position/status snapshots to consumers.

pub mod channels;
pub mod config;
pub mod errors;
pub mod serde_util;
pub mod types;

pub use channels::StateChannel;
pub use config::ConnectorConfig;
pub use errors::{ConnectorError, ConnectorResult};
pub use types::*;
