//! Histdata: historical OHLCV candle management
//!
//! This crate keeps a local, incrementally filled cache of exchange candles
//! and guarantees the ranges it hands out are gap-free and validated:
//! - [sea-orm](https://www.sea-ql.org/SeaORM/) over SQLite for the candle cache
//! - [reqwest](https://github.com/seanmonstar/reqwest) for the Binance klines API
//!
//! # Features
//!
//! - **Candle Store**: upsert, range queries and coverage inspection
//! - **Range Loader**: fetches only uncovered spans, page by page, with retry
//! - **Integrity Validator**: duplicates, gaps, OHLC faults, extreme moves and volume spikes
//! - **Service Facade**: load, cached reads, validation, export and coverage queries
//!
//! # Example
//!
//! ```no_run
//! use histdata::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let service = HistoricalDataService::from_config(HistoryConfig::default()).await?;
//!     let loaded = service
//!         .load_data("BTCUSDT", "2024-01-01", "2024-01-02", "15m")
//!         .await?;
//!     println!("{} candles, cached={}", loaded.records_count, loaded.cached);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod exchange;
pub mod export;
pub mod loader;
pub mod locks;
pub mod service;
pub mod time;

// Re-export commonly used types
pub mod prelude {
    pub use crate::config::*;
    pub use crate::data::*;
    pub use crate::error::{HistoryError, Result};
    pub use crate::exchange::*;
    pub use crate::export::*;
    pub use crate::loader::*;
    pub use crate::service::*;
    pub use crate::time::*;
}

pub use error::{HistoryError, Result};
pub use service::HistoricalDataService;
