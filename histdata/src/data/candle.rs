//! OHLCV candle data structures

use crate::data::validator;
use crate::error::{HistoryError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle bucket size. Boundaries are aligned to the Unix epoch in UTC,
/// which matches how the exchange buckets klines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub const ALL: [Interval; 6] = [
        Interval::OneMinute,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::OneHour,
        Interval::FourHours,
        Interval::OneDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    /// Bucket length in milliseconds
    pub fn duration_ms(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Interval::OneMinute => MINUTE,
            Interval::FiveMinutes => 5 * MINUTE,
            Interval::FifteenMinutes => 15 * MINUTE,
            Interval::OneHour => 60 * MINUTE,
            Interval::FourHours => 240 * MINUTE,
            Interval::OneDay => 1_440 * MINUTE,
        }
    }

    pub fn is_aligned(&self, ts: i64) -> bool {
        ts.rem_euclid(self.duration_ms()) == 0
    }

    /// Latest boundary at or before `ts`
    pub fn align_down(&self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.duration_ms())
    }

    /// Earliest boundary at or after `ts`
    pub fn align_up(&self, ts: i64) -> i64 {
        let down = self.align_down(ts);
        if down == ts {
            ts
        } else {
            down + self.duration_ms()
        }
    }

    pub fn close_time(&self, open_time: i64) -> i64 {
        open_time + self.duration_ms() - 1
    }

    /// Number of bars with open times in `[start, end]`, both aligned
    pub fn bar_count(&self, start: i64, end: i64) -> i64 {
        if end < start {
            0
        } else {
            (end - start) / self.duration_ms() + 1
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1m" => Ok(Interval::OneMinute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHours),
            "1d" => Ok(Interval::OneDay),
            other => Err(HistoryError::UnsupportedInterval(other.to_string())),
        }
    }
}

/// Trim and uppercase a ticker such as `btcusdt` or `BTC/USDT`.
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_uppercase();
    let valid = !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_'));
    if valid {
        Ok(symbol)
    } else {
        Err(HistoryError::InvalidSymbol(raw.to_string()))
    }
}

/// OHLCV candle data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Symbol (e.g., "BTCUSDT")
    pub symbol: String,
    pub interval: Interval,
    /// Bucket start, epoch milliseconds
    pub open_time: i64,
    /// Always `open_time + interval - 1`
    pub close_time: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    #[serde(default)]
    pub trade_count: Option<u64>,
}

impl Candle {
    /// Create a new candle; `close_time` is derived from the interval
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        interval: Interval,
        open_time: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            open_time,
            close_time: interval.close_time(open_time),
            open,
            high,
            low,
            close,
            volume,
            trade_count: None,
        }
    }

    pub fn with_trade_count(mut self, trade_count: u64) -> Self {
        self.trade_count = Some(trade_count);
        self
    }

    pub fn is_aligned(&self) -> bool {
        self.interval.is_aligned(self.open_time)
            && self.close_time == self.interval.close_time(self.open_time)
    }

    /// True when the bar satisfies every per-row OHLCV invariant
    pub fn is_well_formed(&self) -> bool {
        self.is_aligned() && validator::row_issues(self).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[test]
    fn test_interval_round_trip() {
        for interval in Interval::ALL {
            assert_eq!(interval.as_str().parse::<Interval>().unwrap(), interval);
        }
        assert!(matches!(
            "2h".parse::<Interval>(),
            Err(HistoryError::UnsupportedInterval(_))
        ));
    }

    #[test]
    fn test_alignment() {
        let m15 = Interval::FifteenMinutes;
        assert!(m15.is_aligned(1_704_067_200_000));
        assert!(!m15.is_aligned(1_704_067_200_001));
        assert_eq!(m15.align_down(1_704_067_200_001), 1_704_067_200_000);
        assert_eq!(m15.align_up(1_704_067_200_001), 1_704_068_100_000);
        assert_eq!(m15.align_up(1_704_067_200_000), 1_704_067_200_000);
        assert_eq!(m15.align_down(-1), -900_000);
        assert_eq!(m15.bar_count(0, 900_000 * 95), 96);
        assert_eq!(m15.bar_count(900_000, 0), 0);
    }

    #[test]
    fn test_candle_creation() {
        let candle = Candle::new(
            "BTCUSDT",
            Interval::OneHour,
            1_704_067_200_000,
            dec("100.0"),
            dec("110.0"),
            dec("95.0"),
            dec("105.0"),
            dec("1000"),
        );

        assert_eq!(candle.close_time, 1_704_067_200_000 + 3_600_000 - 1);
        assert!(candle.is_aligned());
        assert!(candle.is_well_formed());
        assert_eq!(candle.trade_count, None);
        assert_eq!(candle.with_trade_count(42).trade_count, Some(42));
    }

    #[test]
    fn test_malformed_candle() {
        let candle = Candle::new(
            "BTCUSDT",
            Interval::OneHour,
            1_704_067_200_000,
            dec("100.0"),
            dec("99.0"),
            dec("95.0"),
            dec("105.0"),
            dec("1000"),
        );
        assert!(!candle.is_well_formed());
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" btcusdt ").unwrap(), "BTCUSDT");
        assert_eq!(normalize_symbol("btc/usdt").unwrap(), "BTC/USDT");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("BTC USDT").is_err());
    }
}
