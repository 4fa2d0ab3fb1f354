//! Upstream capability and strict kline parsing

use crate::data::{Candle, Interval};
use crate::error::{HistoryError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// One upstream record as received, before parsing
pub type RawKline = Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream rejected the request: {0}")]
    Rejected(String),
}

impl SourceError {
    /// Worth retrying after a backoff
    pub fn is_transient(&self) -> bool {
        !matches!(self, SourceError::Rejected(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Paginated candle history provider
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Up to `limit` records with `open_time >= start_time`, ascending
    async fn fetch_page(
        &self,
        symbol: &str,
        interval: Interval,
        start_time: i64,
        limit: usize,
    ) -> std::result::Result<Vec<RawKline>, SourceError>;
}

/// Parse a Binance kline array
/// `[open_time, open, high, low, close, volume, close_time, quote_volume, trades, ...]`.
///
/// Only shape and alignment are enforced here; OHLC consistency is the
/// validator's job so that it can be reported rather than thrown.
pub fn parse_kline(symbol: &str, interval: Interval, raw: &RawKline) -> Result<Candle> {
    let fail = |open_time: Option<i64>, reason: String| {
        HistoryError::schema(symbol, interval, open_time, reason)
    };

    let fields = raw
        .as_array()
        .ok_or_else(|| fail(None, format!("expected array, got {}", raw)))?;
    if fields.len() < 6 {
        return Err(fail(None, format!("expected at least 6 fields, got {}", fields.len())));
    }

    let open_time = fields[0]
        .as_i64()
        .ok_or_else(|| fail(None, format!("open_time {} is not an integer", fields[0])))?;
    if !interval.is_aligned(open_time) {
        return Err(fail(
            Some(open_time),
            format!("open_time not aligned to {}", interval),
        ));
    }

    let decimal = |idx: usize, name: &str| -> Result<Decimal> {
        let text = match &fields[idx] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => return Err(fail(Some(open_time), format!("{} is {}", name, other))),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|e| fail(Some(open_time), format!("{} {:?}: {}", name, text, e)))
    };

    let mut candle = Candle::new(
        symbol,
        interval,
        open_time,
        decimal(1, "open")?,
        decimal(2, "high")?,
        decimal(3, "low")?,
        decimal(4, "close")?,
        decimal(5, "volume")?,
    );

    if let Some(raw) = fields.get(6) {
        let close_time = raw
            .as_i64()
            .ok_or_else(|| fail(Some(open_time), format!("close_time is not an integer: {}", raw)))?;
        if close_time != candle.close_time {
            return Err(fail(
                Some(open_time),
                format!("close_time {} != {}", close_time, candle.close_time),
            ));
        }
    }
    if let Some(trades) = fields.get(8).and_then(Value::as_u64) {
        candle = candle.with_trade_count(trades);
    }

    Ok(candle)
}
