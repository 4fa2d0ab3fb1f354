//! Upstream market-data integration
//!
//! [`CandleSource`] is the paginated upstream capability the loader drives;
//! [`BinanceKlineSource`] implements it over the Binance REST klines API.

pub mod client;
pub mod source;

pub use client::*;
pub use source::*;
