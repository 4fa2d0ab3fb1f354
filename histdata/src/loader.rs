//! Paginated range loading with stitching, validation and page-wise commit

use crate::config::RetryPolicy;
use crate::data::{
    Candle, CandleStore, Interval, Issue, IssueKind, TimeRange, ValidationReport, Validator,
};
use crate::error::{HistoryError, Result};
use crate::exchange::{parse_kline, CandleSource, RawKline};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one load pass did
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// Issues found in the pages fetched by this pass
    pub report: ValidationReport,
    /// Every `fetch_page` invocation, retries included
    pub upstream_calls: usize,
    /// Rows written to the store
    pub stored: usize,
    /// Parts of the requested span still absent from the store
    pub unresolved: Vec<TimeRange>,
}

impl LoadOutcome {
    fn new(symbol: &str, interval: Interval) -> Self {
        Self {
            report: ValidationReport::new(symbol, interval),
            upstream_calls: 0,
            stored: 0,
            unresolved: Vec::new(),
        }
    }
}

/// Fetches uncovered spans from a [`CandleSource`] into the [`CandleStore`]
pub struct RangeLoader {
    store: Arc<CandleStore>,
    source: Arc<dyn CandleSource>,
    validator: Validator,
    retry: RetryPolicy,
    page_size: usize,
}

impl RangeLoader {
    pub fn new(
        store: Arc<CandleStore>,
        source: Arc<dyn CandleSource>,
        validator: Validator,
        retry: RetryPolicy,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            source,
            validator,
            retry,
            page_size: page_size.max(1),
        }
    }

    /// Fetch only what the store is missing inside `span`.
    ///
    /// Pages are committed as they are accepted; an upstream failure
    /// returns `SourceUnavailable` without undoing them.
    pub async fn load_missing(
        &self,
        symbol: &str,
        interval: Interval,
        span: TimeRange,
    ) -> Result<LoadOutcome> {
        let mut outcome = LoadOutcome::new(symbol, interval);
        let missing = self
            .store
            .missing_subranges(symbol, interval, span.start, span.end)
            .await?;
        if missing.is_empty() {
            debug!("{} {} fully cached for [{}, {}]", symbol, interval, span.start, span.end);
            return Ok(outcome);
        }

        info!(
            "Loading {} {}: {} missing range(s) in [{}, {}]",
            symbol,
            interval,
            missing.len(),
            span.start,
            span.end
        );
        for range in &missing {
            self.fetch_range(symbol, interval, *range, &mut outcome).await?;
        }
        self.finish(symbol, interval, span, outcome).await
    }

    /// Re-fetch all of `span` and overwrite what is stored there.
    /// Rows that fail validation leave the stored row untouched.
    pub async fn reload(
        &self,
        symbol: &str,
        interval: Interval,
        span: TimeRange,
    ) -> Result<LoadOutcome> {
        let mut outcome = LoadOutcome::new(symbol, interval);
        info!("Reloading {} {} [{}, {}]", symbol, interval, span.start, span.end);
        self.fetch_range(symbol, interval, span, &mut outcome).await?;
        self.finish(symbol, interval, span, outcome).await
    }

    async fn finish(
        &self,
        symbol: &str,
        interval: Interval,
        span: TimeRange,
        mut outcome: LoadOutcome,
    ) -> Result<LoadOutcome> {
        outcome.unresolved = self
            .store
            .missing_subranges(symbol, interval, span.start, span.end)
            .await?;
        if !outcome.unresolved.is_empty() {
            warn!(
                "{} {}: {} range(s) still missing after load",
                symbol,
                interval,
                outcome.unresolved.len()
            );
        }
        info!(
            "Loaded {} {}: stored={} calls={} issues={}",
            symbol,
            interval,
            outcome.stored,
            outcome.upstream_calls,
            outcome.report.issues.len()
        );
        Ok(outcome)
    }

    fn context_len(&self) -> usize {
        self.validator.config().volume_window.max(1)
    }

    /// Stored bars that run contiguously up to `start - 1 interval`
    async fn leading_context(
        &self,
        symbol: &str,
        interval: Interval,
        start: i64,
    ) -> Result<Vec<Candle>> {
        let step = interval.duration_ms();
        let rows = self
            .store
            .query_range(
                symbol,
                interval,
                start - self.context_len() as i64 * step,
                start - step,
            )
            .await?;

        let mut expected = start - step;
        let mut keep = 0;
        for candle in rows.iter().rev() {
            if candle.open_time != expected {
                break;
            }
            keep += 1;
            expected -= step;
        }
        Ok(rows[rows.len() - keep..].to_vec())
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        interval: Interval,
        range: TimeRange,
        outcome: &mut LoadOutcome,
    ) -> Result<()> {
        let step = interval.duration_ms();
        let mut tail = self.leading_context(symbol, interval, range.start).await?;
        let mut last_seen: Option<i64> = None;
        let mut cursor = range.start;

        loop {
            let raw = self.fetch_with_retry(symbol, interval, cursor, outcome).await?;
            if raw.is_empty() {
                debug!("{} {}: empty page at {}", symbol, interval, cursor);
                break;
            }

            let mut page = Vec::with_capacity(raw.len());
            let mut newest: Option<i64> = None;
            for record in &raw {
                match parse_kline(symbol, interval, record) {
                    Ok(candle) => {
                        newest = newest.max(Some(candle.open_time));
                        page.push(candle);
                    }
                    Err(err) => {
                        let at_time = record.get(0).and_then(|v| v.as_i64());
                        newest = newest.max(at_time);
                        warn!("{} {}: dropping malformed record: {}", symbol, interval, err);
                        outcome
                            .report
                            .push(Issue::new(IssueKind::Malformed, at_time.unwrap_or(cursor), err.to_string()));
                    }
                }
            }

            page.sort_by_key(|c| c.open_time);
            page.retain(|c| {
                last_seen.map_or(true, |last| c.open_time > last) && range.contains(c.open_time)
            });
            debug!(
                "{} {}: page at {} returned {} record(s), {} new",
                symbol,
                interval,
                cursor,
                raw.len(),
                page.len()
            );

            if !page.is_empty() {
                last_seen = page.last().map(|c| c.open_time);
                let accepted = self.accept_page(symbol, interval, &tail, page, outcome);
                if !accepted.is_empty() {
                    let written = self.store.upsert(&accepted).await?;
                    outcome.stored += written.written;
                    let refused: HashSet<i64> = written.rejected_times().collect();
                    outcome.report.issues.extend(written.rejected);
                    tail.extend(accepted.into_iter().filter(|c| !refused.contains(&c.open_time)));
                    let excess = tail.len().saturating_sub(self.context_len());
                    tail = tail.split_off(excess);
                }
            }

            let Some(newest) = newest else {
                warn!("{} {}: page at {} has no usable open times", symbol, interval, cursor);
                break;
            };
            if newest < cursor || raw.len() < self.page_size {
                break;
            }
            cursor = newest + step;
            if cursor > range.end {
                break;
            }
        }
        Ok(())
    }

    /// Validate a stitched page against the accepted tail and return the rows
    /// fit for storage: no row-level fault, first occurrence of each open time.
    fn accept_page(
        &self,
        symbol: &str,
        interval: Interval,
        tail: &[Candle],
        page: Vec<Candle>,
        outcome: &mut LoadOutcome,
    ) -> Vec<Candle> {
        let report = self
            .validator
            .validate_with_context(symbol, interval, tail, &page);
        let faulty = report.row_fault_times();

        let mut seen = HashSet::new();
        let mut accepted = Vec::with_capacity(page.len());
        let mut excluded = 0;
        for candle in page {
            if faulty.contains(&candle.open_time) || !seen.insert(candle.open_time) {
                excluded += 1;
                continue;
            }
            accepted.push(candle);
        }
        if excluded > 0 {
            warn!("{} {}: excluded {} row(s) with errors", symbol, interval, excluded);
        }

        outcome.report.merge(report);
        accepted
    }

    async fn fetch_with_retry(
        &self,
        symbol: &str,
        interval: Interval,
        cursor: i64,
        outcome: &mut LoadOutcome,
    ) -> Result<Vec<RawKline>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            outcome.upstream_calls += 1;
            match self
                .source
                .fetch_page(symbol, interval, cursor, self.page_size)
                .await
            {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let wait = self.retry.wait_for(attempt, err.retry_after());
                    warn!(
                        "{} {}: attempt {}/{} at {} failed ({}), retrying in {:?}",
                        symbol,
                        interval,
                        attempt,
                        self.retry.max_attempts,
                        cursor,
                        err,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    return Err(HistoryError::SourceUnavailable {
                        symbol: symbol.to_string(),
                        interval: interval.to_string(),
                        attempts: attempt,
                        reason: err.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SourceError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    const M15: i64 = 900_000;
    const T0: i64 = 1_704_067_200_000;

    /// Serves scripted pages in order and records requested cursors
    struct ScriptedSource {
        pages: Mutex<Vec<std::result::Result<Vec<RawKline>, SourceError>>>,
        cursors: Mutex<Vec<i64>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<std::result::Result<Vec<RawKline>, SourceError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                cursors: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CandleSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _symbol: &str,
            _interval: Interval,
            start_time: i64,
            _limit: usize,
        ) -> std::result::Result<Vec<RawKline>, SourceError> {
            self.cursors.lock().unwrap().push(start_time);
            self.pages.lock().unwrap().pop().unwrap_or(Ok(Vec::new()))
        }
    }

    fn kline(i: i64, close: &str) -> RawKline {
        let t = T0 + i * M15;
        json!([t, close, close, close, close, "10", t + M15 - 1, "0", 5])
    }

    fn klines(range: std::ops::Range<i64>) -> Vec<RawKline> {
        range.map(|i| kline(i, "100")).collect()
    }

    async fn loader(source: Arc<ScriptedSource>, page_size: usize) -> (Arc<CandleStore>, RangeLoader) {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let loader = RangeLoader::new(
            store.clone(),
            source,
            Validator::default(),
            RetryPolicy::immediate(3),
            page_size,
        );
        (store, loader)
    }

    fn span(first: i64, last: i64) -> TimeRange {
        TimeRange::new(T0 + first * M15, T0 + last * M15)
    }

    #[tokio::test]
    async fn test_pages_are_stitched() {
        // second page repeats the boundary bar of the first
        let source = ScriptedSource::new(vec![Ok(klines(0..4)), Ok(klines(3..8)), Ok(klines(8..10))]);
        let (store, loader) = loader(source.clone(), 4).await;

        let outcome = loader
            .load_missing("BTCUSDT", Interval::FifteenMinutes, span(0, 9))
            .await
            .unwrap();
        assert_eq!(outcome.stored, 10);
        assert!(outcome.report.is_clean());
        assert!(outcome.unresolved.is_empty());
        assert_eq!(
            *source.cursors.lock().unwrap(),
            vec![T0, T0 + 4 * M15, T0 + 8 * M15]
        );
        assert_eq!(store.count("BTCUSDT", Interval::FifteenMinutes).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_rows_past_range_end_are_ignored() {
        let source = ScriptedSource::new(vec![Ok(klines(0..6))]);
        let (store, loader) = loader(source, 500).await;
        let outcome = loader
            .load_missing("BTCUSDT", Interval::FifteenMinutes, span(0, 3))
            .await
            .unwrap();
        assert_eq!(outcome.stored, 4);
        assert_eq!(outcome.upstream_calls, 1);
        assert_eq!(store.count("BTCUSDT", Interval::FifteenMinutes).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_faulty_rows_excluded_and_unresolved() {
        let mut page = klines(0..5);
        page[2] = json!([T0 + 2 * M15, "100", "90", "95", "100", "10"]);
        page[3] = json!([T0 + 3 * M15, "oops"]);
        let source = ScriptedSource::new(vec![Ok(page)]);
        let (store, loader) = loader(source, 500).await;

        let outcome = loader
            .load_missing("BTCUSDT", Interval::FifteenMinutes, span(0, 4))
            .await
            .unwrap();
        assert_eq!(outcome.stored, 3);
        assert_eq!(outcome.report.count(IssueKind::OhlcViolation), 1);
        assert_eq!(outcome.report.count(IssueKind::Malformed), 1);
        assert_eq!(outcome.unresolved, vec![span(2, 3)]);
        assert_eq!(store.count("BTCUSDT", Interval::FifteenMinutes).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_hard_rejection_is_not_retried() {
        let source = ScriptedSource::new(vec![Err(SourceError::Rejected("Invalid symbol.".into()))]);
        let (_, loader) = loader(source.clone(), 500).await;
        let err = loader
            .load_missing("BTCUSDT", Interval::FifteenMinutes, span(0, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::SourceUnavailable { attempts: 1, .. }));
        assert_eq!(source.cursors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_only_missing_ranges_are_fetched() {
        let source = ScriptedSource::new(vec![Ok(klines(4..6)), Ok(klines(6..8))]);
        let (store, loader) = loader(source.clone(), 500).await;
        let cached: Vec<Candle> = (0..4)
            .map(|i| parse_kline("BTCUSDT", Interval::FifteenMinutes, &kline(i, "100")).unwrap())
            .collect();
        store.upsert(&cached).await.unwrap();

        let outcome = loader
            .load_missing("BTCUSDT", Interval::FifteenMinutes, span(0, 5))
            .await
            .unwrap();
        assert_eq!(*source.cursors.lock().unwrap(), vec![T0 + 4 * M15]);
        assert_eq!(outcome.stored, 2);

        // the price jump is measured against the cached bar preceding the range
        let source = ScriptedSource::new(vec![Ok(vec![kline(6, "170")])]);
        let loader = RangeLoader::new(
            store.clone(),
            source,
            Validator::default(),
            RetryPolicy::immediate(1),
            500,
        );
        let outcome = loader
            .load_missing("BTCUSDT", Interval::FifteenMinutes, span(0, 6))
            .await
            .unwrap();
        assert_eq!(outcome.report.count(IssueKind::ExtremePriceMove), 1);
        assert_eq!(outcome.stored, 1);
    }
}
