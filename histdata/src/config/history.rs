//! Typed, validated settings for the historical data service

use crate::config::RetryPolicy;
use crate::data::{Interval, ValidatorConfig};
use crate::error::{HistoryError, Result};
use crate::exchange::BinanceMarket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Largest page the Binance klines endpoints will serve for our use
pub const UPSTREAM_PAGE_CAP: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// SQLite file backing the cache, or `:memory:`
    pub cache_path: String,
    pub supported_intervals: BTreeSet<Interval>,
    /// Records requested per upstream page
    pub max_page_size: usize,
    /// Base directory for relative export paths
    pub export_dir: PathBuf,
    /// Cached reads over partially covered spans fail instead of returning what exists
    pub strict_cache: bool,
    pub retry: RetryPolicy,
    pub validator: ValidatorConfig,
    pub market: BinanceMarket,
    pub base_url: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            cache_path: "data/historical_data.db".to_string(),
            supported_intervals: Interval::ALL.into_iter().collect(),
            max_page_size: UPSTREAM_PAGE_CAP,
            export_dir: PathBuf::from("exports"),
            strict_cache: false,
            retry: RetryPolicy::default(),
            validator: ValidatorConfig::default(),
            market: BinanceMarket::Futures,
            base_url: None,
        }
    }
}

impl HistoryConfig {
    /// In-memory cache with defaults otherwise
    pub fn in_memory() -> Self {
        Self {
            cache_path: ":memory:".to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_page_size == 0 || self.max_page_size > UPSTREAM_PAGE_CAP {
            return Err(HistoryError::InvalidConfig(format!(
                "max_page_size must be within 1..={}, got {}",
                UPSTREAM_PAGE_CAP, self.max_page_size
            )));
        }
        if self.supported_intervals.is_empty() {
            return Err(HistoryError::InvalidConfig(
                "at least one supported interval is required".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(HistoryError::InvalidConfig(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if self.cache_path.trim().is_empty() {
            return Err(HistoryError::InvalidConfig("cache_path is empty".to_string()));
        }
        Ok(())
    }

    /// Parse and check an interval against the supported set
    pub fn interval(&self, raw: &str) -> Result<Interval> {
        let interval: Interval = raw.parse()?;
        if self.supported_intervals.contains(&interval) {
            Ok(interval)
        } else {
            Err(HistoryError::UnsupportedInterval(raw.to_string()))
        }
    }
}

impl TryFrom<&shared::Config> for HistoryConfig {
    type Error = HistoryError;

    fn try_from(raw: &shared::Config) -> Result<Self> {
        let supported_intervals = raw
            .supported_intervals
            .iter()
            .map(|s| s.parse::<Interval>())
            .collect::<Result<BTreeSet<_>>>()?;
        let market: BinanceMarket = raw.binance_market.parse()?;

        let config = Self {
            cache_path: raw.cache_path.clone(),
            supported_intervals,
            max_page_size: raw.max_page_size,
            export_dir: PathBuf::from(&raw.export_dir),
            strict_cache: raw.strict_cache,
            retry: RetryPolicy {
                max_attempts: raw.retry_max_attempts,
                base_delay: Duration::from_millis(raw.retry_base_delay_ms),
                ..RetryPolicy::default()
            },
            validator: ValidatorConfig::default(),
            market,
            base_url: raw.binance_base_url.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}
