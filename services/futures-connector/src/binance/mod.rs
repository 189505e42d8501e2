//! Binance USDS-M futures transport
//!
//! Production [`crate::transport::VenueTransport`] implementation: signed
//! REST over `reqwest` and streams over `tokio-tungstenite`.

mod rest;
mod ws;

pub use rest::BinanceTransport;
