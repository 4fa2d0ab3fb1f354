//! Persistent candle cache backed by SQLite through Sea-ORM

use crate::data::coverage::{group_contiguous, subtract};
use crate::data::{Candle, CoverageRange, Interval, Issue, IssueKind, TimeRange};
use crate::error::{HistoryError, Result};
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use shared::entity::candles;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Rows per INSERT statement; 11 bound columns each keeps us well under
/// SQLite's host-parameter limit.
const UPSERT_CHUNK: usize = 80;

/// What the cache holds for one symbol/interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSummary {
    pub symbol: String,
    pub interval: Interval,
    pub record_count: u64,
    pub first_open_time: Option<i64>,
    pub last_open_time: Option<i64>,
    pub ranges: Vec<CoverageRange>,
}

/// What [`CandleStore::upsert`] did with a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub written: usize,
    /// Rows refused for breaking the schema, one `malformed` issue each
    pub rejected: Vec<Issue>,
}

impl UpsertOutcome {
    pub fn rejected_times(&self) -> impl Iterator<Item = i64> + '_ {
        self.rejected.iter().map(|issue| issue.at_time)
    }
}

/// The single writer of cached candle rows.
///
/// Construct once and share behind an `Arc`.
pub struct CandleStore {
    db: Arc<DatabaseConnection>,
}

impl CandleStore {
    /// Open (creating if needed) the cache file at `cache_path`;
    /// `":memory:"` gives a private in-memory cache.
    pub async fn open(cache_path: &str) -> Result<Self> {
        let url = shared::sqlite_url(cache_path)
            .map_err(|e| HistoryError::InvalidConfig(format!("cache path {}: {:#}", cache_path, e)))?;
        let db = shared::get_db_connection(&url)
            .await
            .map_err(|e| HistoryError::InvalidConfig(format!("cache {}: {:#}", url, e)))?;
        Self::from_connection(Arc::new(db)).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open(shared::MEMORY_DATABASE_URL).await
    }

    /// Wrap an existing connection, bringing the schema up to date
    pub async fn from_connection(db: Arc<DatabaseConnection>) -> Result<Self> {
        Migrator::up(db.as_ref(), None).await?;
        Ok(Self { db })
    }

    /// Insert or overwrite candles by `(symbol, interval, open_time)`.
    ///
    /// A misaligned bar or wrong `close_time` is refused on its own; the
    /// rest of the batch is still written.
    pub async fn upsert(&self, candles: &[Candle]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        let mut valid = Vec::with_capacity(candles.len());
        for candle in candles {
            match check_schema(candle) {
                Ok(()) => valid.push(candle),
                Err(err) => {
                    warn!("Refusing candle: {}", err);
                    outcome
                        .rejected
                        .push(Issue::new(IssueKind::Malformed, candle.open_time, err.to_string()));
                }
            }
        }
        if valid.is_empty() {
            return Ok(outcome);
        }

        let fetched_at = Utc::now();
        let txn = self.db.begin().await?;
        for chunk in valid.chunks(UPSERT_CHUNK) {
            let rows = chunk.iter().map(|candle| to_active_model(candle, fetched_at));
            candles::Entity::insert_many(rows)
                .on_conflict(
                    OnConflict::columns([
                        candles::Column::Symbol,
                        candles::Column::Interval,
                        candles::Column::OpenTime,
                    ])
                    .update_columns([
                        candles::Column::CloseTime,
                        candles::Column::Open,
                        candles::Column::High,
                        candles::Column::Low,
                        candles::Column::Close,
                        candles::Column::Volume,
                        candles::Column::TradeCount,
                        candles::Column::FetchedAt,
                    ])
                    .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;

        outcome.written = valid.len();
        debug!(
            "Upserted {} candle(s) for {} {}, {} refused",
            outcome.written,
            valid[0].symbol,
            valid[0].interval,
            outcome.rejected.len()
        );
        Ok(outcome)
    }

    /// Stored candles with `open_time` in `[start, end]`, ascending
    pub async fn query_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>> {
        if end < start {
            return Ok(Vec::new());
        }
        let rows = candles::Entity::find()
            .filter(candles::Column::Symbol.eq(symbol))
            .filter(candles::Column::Interval.eq(interval.as_str()))
            .filter(candles::Column::OpenTime.between(start, end))
            .order_by_asc(candles::Column::OpenTime)
            .all(self.db.as_ref())
            .await?;
        rows.into_iter().map(from_model).collect()
    }

    /// Every stored candle for the key, ascending
    pub async fn query_all(&self, symbol: &str, interval: Interval) -> Result<Vec<Candle>> {
        let rows = candles::Entity::find()
            .filter(candles::Column::Symbol.eq(symbol))
            .filter(candles::Column::Interval.eq(interval.as_str()))
            .order_by_asc(candles::Column::OpenTime)
            .all(self.db.as_ref())
            .await?;
        rows.into_iter().map(from_model).collect()
    }

    pub async fn count(&self, symbol: &str, interval: Interval) -> Result<u64> {
        let count = candles::Entity::find()
            .filter(candles::Column::Symbol.eq(symbol))
            .filter(candles::Column::Interval.eq(interval.as_str()))
            .count(self.db.as_ref())
            .await?;
        Ok(count)
    }

    /// Contiguous runs of stored open times, ascending and non-overlapping
    pub async fn coverage(&self, symbol: &str, interval: Interval) -> Result<Vec<CoverageRange>> {
        let times = self.open_times(symbol, interval, None).await?;
        Ok(group_contiguous(&times, interval.duration_ms())
            .into_iter()
            .map(|run| CoverageRange {
                symbol: symbol.to_string(),
                interval,
                start_time: run.start,
                end_time: run.end,
            })
            .collect())
    }

    /// Aligned open-time span `[start, end]` minus what is already stored
    pub async fn missing_subranges(
        &self,
        symbol: &str,
        interval: Interval,
        start: i64,
        end: i64,
    ) -> Result<Vec<TimeRange>> {
        let span = TimeRange::new(start, end);
        let times = self.open_times(symbol, interval, Some(span)).await?;
        let step = interval.duration_ms();
        Ok(subtract(span, &group_contiguous(&times, step), step))
    }

    pub async fn summary(&self, symbol: &str, interval: Interval) -> Result<DataSummary> {
        let ranges = self.coverage(symbol, interval).await?;
        let record_count = ranges.iter().map(|r| r.bar_count() as u64).sum();
        Ok(DataSummary {
            symbol: symbol.to_string(),
            interval,
            record_count,
            first_open_time: ranges.first().map(|r| r.start_time),
            last_open_time: ranges.last().map(|r| r.end_time),
            ranges,
        })
    }

    /// Distinct `(symbol, interval)` keys present in the cache
    pub async fn datasets(&self) -> Result<Vec<(String, Interval)>> {
        let keys: Vec<(String, String)> = candles::Entity::find()
            .select_only()
            .column(candles::Column::Symbol)
            .column(candles::Column::Interval)
            .distinct()
            .order_by_asc(candles::Column::Symbol)
            .order_by_asc(candles::Column::Interval)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;
        keys.into_iter()
            .map(|(symbol, interval)| Ok((symbol, interval.parse()?)))
            .collect()
    }

    async fn open_times(
        &self,
        symbol: &str,
        interval: Interval,
        within: Option<TimeRange>,
    ) -> Result<Vec<i64>> {
        let mut query = candles::Entity::find()
            .select_only()
            .column(candles::Column::OpenTime)
            .filter(candles::Column::Symbol.eq(symbol))
            .filter(candles::Column::Interval.eq(interval.as_str()));
        if let Some(span) = within {
            query = query.filter(candles::Column::OpenTime.between(span.start, span.end));
        }
        let times: Vec<i64> = query
            .order_by_asc(candles::Column::OpenTime)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;
        Ok(times)
    }
}

fn check_schema(candle: &Candle) -> Result<()> {
    if candle.symbol.trim().is_empty() {
        return Err(HistoryError::schema(
            &candle.symbol,
            candle.interval,
            Some(candle.open_time),
            "empty symbol",
        ));
    }
    if !candle.interval.is_aligned(candle.open_time) {
        return Err(HistoryError::schema(
            &candle.symbol,
            candle.interval,
            Some(candle.open_time),
            format!("open_time not aligned to {}", candle.interval),
        ));
    }
    let expected = candle.interval.close_time(candle.open_time);
    if candle.close_time != expected {
        return Err(HistoryError::schema(
            &candle.symbol,
            candle.interval,
            Some(candle.open_time),
            format!("close_time {} != {}", candle.close_time, expected),
        ));
    }
    Ok(())
}

fn to_active_model(candle: &Candle, fetched_at: chrono::DateTime<Utc>) -> candles::ActiveModel {
    candles::ActiveModel {
        symbol: ActiveValue::Set(candle.symbol.clone()),
        interval: ActiveValue::Set(candle.interval.as_str().to_string()),
        open_time: ActiveValue::Set(candle.open_time),
        close_time: ActiveValue::Set(candle.close_time),
        open: ActiveValue::Set(candle.open.to_string()),
        high: ActiveValue::Set(candle.high.to_string()),
        low: ActiveValue::Set(candle.low.to_string()),
        close: ActiveValue::Set(candle.close.to_string()),
        volume: ActiveValue::Set(candle.volume.to_string()),
        trade_count: ActiveValue::Set(candle.trade_count.and_then(|n| i64::try_from(n).ok())),
        fetched_at: ActiveValue::Set(fetched_at),
    }
}

fn from_model(row: candles::Model) -> Result<Candle> {
    let interval: Interval = row.interval.parse()?;
    let decimal = |field: &str, raw: &str| {
        Decimal::from_str(raw).map_err(|e| {
            HistoryError::schema(
                &row.symbol,
                interval,
                Some(row.open_time),
                format!("stored {} {:?} is not a decimal: {}", field, raw, e),
            )
        })
    };
    Ok(Candle {
        open: decimal("open", &row.open)?,
        high: decimal("high", &row.high)?,
        low: decimal("low", &row.low)?,
        close: decimal("close", &row.close)?,
        volume: decimal("volume", &row.volume)?,
        trade_count: row.trade_count.and_then(|n| u64::try_from(n).ok()),
        symbol: row.symbol,
        interval,
        open_time: row.open_time,
        close_time: row.close_time,
    })
}
