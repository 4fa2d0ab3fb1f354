//! Error types for the historical data subsystem

use crate::data::TimeRange;
use thiserror::Error;

/// Failures surfaced to callers of the store, loader and service.
///
/// Validation findings are not errors; they travel in a
/// [`ValidationReport`](crate::data::ValidationReport).
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A candle offered to the store (or parsed from upstream) breaks the schema
    #[error("schema violation for {symbol} {interval} at {open_time:?}: {reason}")]
    SchemaViolation {
        symbol: String,
        interval: String,
        open_time: Option<i64>,
        reason: String,
    },

    /// Upstream retries exhausted, or the upstream rejected the request outright
    #[error("upstream unavailable for {symbol} {interval} after {attempts} attempt(s): {reason}")]
    SourceUnavailable {
        symbol: String,
        interval: String,
        attempts: u32,
        reason: String,
    },

    #[error("unsupported export format: {0} (supported: csv, json)")]
    UnsupportedFormat(String),

    #[error("no candles for {symbol} ({interval})")]
    EmptyDataset { symbol: String, interval: String },

    /// Strict cached read over a span that is not fully cached
    #[error("{symbol} ({interval}) is not fully cached: {} missing range(s)", .missing.len())]
    NotCached {
        symbol: String,
        interval: String,
        missing: Vec<TimeRange>,
    },

    #[error("unsupported interval: {0}")]
    UnsupportedInterval(String),

    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("invalid time range: {0}")]
    InvalidRange(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HistoryError {
    pub(crate) fn schema(
        symbol: &str,
        interval: impl ToString,
        open_time: Option<i64>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            open_time,
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, HistoryError>;
