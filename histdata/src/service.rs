//! Historical data service
//!
//! Composes the candle store, range loader and validator into the
//! operations external callers use. Writers for one `(symbol, interval)`
//! are serialized through [`KeyedLocks`]; reads go straight to the store.

use crate::config::HistoryConfig;
use crate::data::{
    normalize_symbol, Candle, CandleStore, CoverageRange, DataSummary, Interval, Severity,
    TimeRange, ValidationReport, Validator,
};
use crate::error::{HistoryError, Result};
use crate::exchange::{BinanceKlineSource, CandleSource};
use crate::export::{read_candles, write_candles, ExportFormat};
use crate::loader::{LoadOutcome, RangeLoader};
use crate::locks::KeyedLocks;
use crate::time::{parse_time, requested_span};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of [`HistoricalDataService::load_data`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadResult {
    pub symbol: String,
    pub interval: Interval,
    /// Requested open-time span
    pub span: TimeRange,
    pub records_count: usize,
    /// Issues found in pages fetched by this call; empty when served from cache
    pub validation: ValidationReport,
    /// True when no upstream call was needed
    pub cached: bool,
    pub candles: Vec<Candle>,
    pub unresolved_gaps: Vec<TimeRange>,
    pub upstream_calls: usize,
}

/// Result of [`HistoricalDataService::get_cached_data`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData {
    pub symbol: String,
    pub interval: Interval,
    pub span: TimeRange,
    pub candles: Vec<Candle>,
    /// Coverage runs intersecting the span
    pub coverage: Vec<CoverageRange>,
    pub missing: Vec<TimeRange>,
}

impl CachedData {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanData {
    pub candles: Vec<Candle>,
    pub report: ValidationReport,
    /// Cached bars withheld because of their issues
    pub dropped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    pub symbol: String,
    pub interval: Interval,
    pub format: ExportFormat,
    pub path: PathBuf,
    pub records_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheResult {
    pub validation: ValidationReport,
    /// Rows written; rows already cached are never overwritten here.
    /// Rows refused by the store show up as `malformed` issues.
    pub stored: usize,
    pub skipped_existing: usize,
}

pub struct HistoricalDataService {
    config: Arc<HistoryConfig>,
    store: Arc<CandleStore>,
    loader: RangeLoader,
    validator: Validator,
    locks: KeyedLocks,
}

impl HistoricalDataService {
    /// Open the configured cache and talk to Binance
    pub async fn from_config(config: HistoryConfig) -> Result<Self> {
        let source = BinanceKlineSource::new(config.market, config.base_url.clone())?;
        Self::new(config, Arc::new(source)).await
    }

    /// Open the configured cache with a custom upstream
    pub async fn new(config: HistoryConfig, source: Arc<dyn CandleSource>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(CandleStore::open(&config.cache_path).await?);
        Self::with_store(config, store, source)
    }

    pub fn with_store(
        config: HistoryConfig,
        store: Arc<CandleStore>,
        source: Arc<dyn CandleSource>,
    ) -> Result<Self> {
        config.validate()?;
        let validator = Validator::new(config.validator.clone());
        let loader = RangeLoader::new(
            store.clone(),
            source,
            validator.clone(),
            config.retry.clone(),
            config.max_page_size,
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            loader,
            validator,
            locks: KeyedLocks::new(),
        })
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CandleStore> {
        &self.store
    }

    fn key(&self, symbol: &str, interval: &str) -> Result<(String, Interval)> {
        Ok((normalize_symbol(symbol)?, self.config.interval(interval)?))
    }

    fn request(
        &self,
        symbol: &str,
        start: &str,
        end: &str,
        interval: &str,
    ) -> Result<(String, Interval, TimeRange)> {
        let (symbol, interval) = self.key(symbol, interval)?;
        let span = requested_span(interval, parse_time(start)?, parse_time(end)?)?;
        Ok((symbol, interval, span))
    }

    /// Make `[start, end)` available from the cache, fetching only what is
    /// missing, and return the cached range.
    pub async fn load_data(
        &self,
        symbol: &str,
        start: &str,
        end: &str,
        interval: &str,
    ) -> Result<LoadResult> {
        let (symbol, interval, span) = self.request(symbol, start, end, interval)?;
        let _guard = self.locks.acquire(&symbol, interval).await;
        let outcome = self.loader.load_missing(&symbol, interval, span).await?;
        self.finish_load(symbol, interval, span, outcome).await
    }

    /// Re-fetch `[start, end)` regardless of coverage, overwriting cached rows
    /// that pass validation.
    pub async fn repair_range(
        &self,
        symbol: &str,
        start: &str,
        end: &str,
        interval: &str,
    ) -> Result<LoadResult> {
        let (symbol, interval, span) = self.request(symbol, start, end, interval)?;
        let _guard = self.locks.acquire(&symbol, interval).await;
        let outcome = self.loader.reload(&symbol, interval, span).await?;
        self.finish_load(symbol, interval, span, outcome).await
    }

    async fn finish_load(
        &self,
        symbol: String,
        interval: Interval,
        span: TimeRange,
        outcome: LoadOutcome,
    ) -> Result<LoadResult> {
        let candles = self
            .store
            .query_range(&symbol, interval, span.start, span.end)
            .await?;
        Ok(LoadResult {
            records_count: candles.len(),
            cached: outcome.upstream_calls == 0,
            validation: outcome.report,
            candles,
            unresolved_gaps: outcome.unresolved,
            upstream_calls: outcome.upstream_calls,
            symbol,
            interval,
            span,
        })
    }

    /// Whatever the cache holds for `[start, end)`, plus what it lacks.
    /// In strict mode a partially covered span is `NotCached`.
    pub async fn get_cached_data(
        &self,
        symbol: &str,
        start: &str,
        end: &str,
        interval: &str,
    ) -> Result<CachedData> {
        let (symbol, interval, span) = self.request(symbol, start, end, interval)?;
        let candles = self
            .store
            .query_range(&symbol, interval, span.start, span.end)
            .await?;
        let missing = self
            .store
            .missing_subranges(&symbol, interval, span.start, span.end)
            .await?;
        if self.config.strict_cache && !missing.is_empty() {
            return Err(HistoryError::NotCached {
                symbol,
                interval: interval.to_string(),
                missing,
            });
        }

        let coverage = self
            .store
            .coverage(&symbol, interval)
            .await?
            .into_iter()
            .filter(|range| range.span().intersect(&span).is_some())
            .collect();
        Ok(CachedData {
            symbol,
            interval,
            span,
            candles,
            coverage,
            missing,
        })
    }

    /// Validate caller-supplied candles against `(symbol, interval)`.
    /// Rows with a different key are reported; an empty input is an
    /// invalid report rather than an error.
    pub fn validate_data(
        &self,
        symbol: &str,
        interval: &str,
        candles: &[Candle],
    ) -> Result<ValidationReport> {
        let (symbol, interval) = self.key(symbol, interval)?;
        Ok(self.validator.validate(&symbol, interval, candles))
    }

    /// Cached candles for `[start, end)` minus bars with errors and, unless
    /// `tolerate_warnings`, bars with warnings.
    pub async fn get_clean_data(
        &self,
        symbol: &str,
        start: &str,
        end: &str,
        interval: &str,
        tolerate_warnings: bool,
    ) -> Result<CleanData> {
        let (symbol, interval, span) = self.request(symbol, start, end, interval)?;
        let candles = self
            .store
            .query_range(&symbol, interval, span.start, span.end)
            .await?;
        let report = self.validator.validate(&symbol, interval, &candles);

        let threshold = if tolerate_warnings {
            Severity::Error
        } else {
            Severity::Warning
        };
        let flagged = report.flagged_times(threshold);
        let total = candles.len();
        let candles: Vec<Candle> = candles
            .into_iter()
            .filter(|c| !flagged.contains(&c.open_time))
            .collect();
        Ok(CleanData {
            dropped: total - candles.len(),
            candles,
            report,
        })
    }

    /// Validate caller-supplied candles and cache the acceptable ones that
    /// are not cached yet.
    pub async fn cache_data(
        &self,
        symbol: &str,
        interval: &str,
        candles: &[Candle],
    ) -> Result<CacheResult> {
        let (symbol, interval) = self.key(symbol, interval)?;
        let _guard = self.locks.acquire(&symbol, interval).await;

        let mut report = self.validator.validate(&symbol, interval, candles);
        let rejected = report.row_fault_times();

        let mut existing: HashSet<i64> = HashSet::new();
        if let (Some(lo), Some(hi)) = (
            candles.iter().map(|c| c.open_time).min(),
            candles.iter().map(|c| c.open_time).max(),
        ) {
            existing.extend(
                self.store
                    .query_range(&symbol, interval, lo, hi)
                    .await?
                    .into_iter()
                    .map(|c| c.open_time),
            );
        }

        let mut seen = HashSet::new();
        let mut skipped_existing = 0;
        let mut fresh = Vec::new();
        for candle in candles {
            if rejected.contains(&candle.open_time) || !seen.insert(candle.open_time) {
                continue;
            }
            if existing.contains(&candle.open_time) {
                skipped_existing += 1;
                continue;
            }
            fresh.push(candle.clone());
        }
        let written = self.store.upsert(&fresh).await?;
        report.issues.extend(written.rejected);
        info!(
            "Cached {} caller-supplied {} {} candle(s), {} already present",
            written.written, symbol, interval, skipped_existing
        );
        Ok(CacheResult {
            validation: report,
            stored: written.written,
            skipped_existing,
        })
    }

    /// Export everything cached for the key
    pub async fn export_data(
        &self,
        symbol: &str,
        interval: &str,
        format: &str,
        path: impl AsRef<Path>,
    ) -> Result<ExportResult> {
        let format: ExportFormat = format.parse()?;
        let (symbol, interval) = self.key(symbol, interval)?;
        let candles = self.store.query_all(&symbol, interval).await?;
        self.write_export(symbol, interval, format, path.as_ref(), candles)
    }

    /// Export the cached part of `[start, end)`
    pub async fn export_data_range(
        &self,
        symbol: &str,
        interval: &str,
        format: &str,
        path: impl AsRef<Path>,
        start: &str,
        end: &str,
    ) -> Result<ExportResult> {
        let format: ExportFormat = format.parse()?;
        let (symbol, interval, span) = self.request(symbol, start, end, interval)?;
        let candles = self
            .store
            .query_range(&symbol, interval, span.start, span.end)
            .await?;
        self.write_export(symbol, interval, format, path.as_ref(), candles)
    }

    fn write_export(
        &self,
        symbol: String,
        interval: Interval,
        format: ExportFormat,
        path: &Path,
        candles: Vec<Candle>,
    ) -> Result<ExportResult> {
        if candles.is_empty() {
            warn!("Nothing cached to export for {} {}", symbol, interval);
            return Err(HistoryError::EmptyDataset {
                symbol,
                interval: interval.to_string(),
            });
        }
        let path = self.resolve_export_path(path);
        write_candles(format, &path, &candles)?;
        info!(
            "Exported {} {} {} candle(s) to {}",
            candles.len(),
            symbol,
            interval,
            path.display()
        );
        Ok(ExportResult {
            symbol,
            interval,
            format,
            path,
            records_count: candles.len(),
        })
    }

    fn resolve_export_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.export_dir.join(path)
        }
    }

    /// Read a previously exported file. Relative paths resolve against the
    /// export directory first, then the working directory.
    pub fn import_data(&self, format: &str, path: impl AsRef<Path>) -> Result<Vec<Candle>> {
        let format: ExportFormat = format.parse()?;
        let path = path.as_ref();
        let exported = self.resolve_export_path(path);
        if exported.exists() {
            read_candles(format, &exported)
        } else {
            read_candles(format, path)
        }
    }

    pub async fn get_available_data_range(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Vec<CoverageRange>> {
        let (symbol, interval) = self.key(symbol, interval)?;
        self.store.coverage(&symbol, interval).await
    }

    pub async fn get_data_summary(&self, symbol: &str, interval: &str) -> Result<DataSummary> {
        let (symbol, interval) = self.key(symbol, interval)?;
        self.store.summary(&symbol, interval).await
    }
}
