//! Candle sequence integrity checks
//!
//! The validator never mutates or drops data. It walks an ordered sequence
//! once and reports what it finds; callers decide what to keep.

use crate::data::{Candle, Interval, TimeRange};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Anomalous but structurally valid
    Warning,
    /// Structurally invalid
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Duplicate,
    Gap,
    OhlcViolation,
    NonPositivePrice,
    NegativeVolume,
    ExtremePriceMove,
    ExtremeVolume,
    OutOfOrder,
    KeyMismatch,
    Malformed,
    /// Nothing to validate
    EmptyData,
}

impl IssueKind {
    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::ExtremePriceMove | IssueKind::ExtremeVolume => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Faults that make the row itself unusable, as opposed to faults in
    /// how rows relate to each other.
    pub fn is_row_fault(&self) -> bool {
        matches!(
            self,
            IssueKind::OhlcViolation
                | IssueKind::NonPositivePrice
                | IssueKind::NegativeVolume
                | IssueKind::KeyMismatch
                | IssueKind::Malformed
        )
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::Duplicate => "duplicate",
            IssueKind::Gap => "gap",
            IssueKind::OhlcViolation => "OHLC violation",
            IssueKind::NonPositivePrice => "non-positive price",
            IssueKind::NegativeVolume => "negative volume",
            IssueKind::ExtremePriceMove => "extreme price move",
            IssueKind::ExtremeVolume => "extreme volume",
            IssueKind::OutOfOrder => "out of order",
            IssueKind::KeyMismatch => "symbol/interval mismatch",
            IssueKind::Malformed => "malformed record",
            IssueKind::EmptyData => "empty data",
        };
        f.write_str(name)
    }
}

/// One finding, anchored at the open time it concerns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub at_time: i64,
    pub detail: String,
    /// Exact missing open times, set for gaps only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<TimeRange>,
}

impl Issue {
    pub fn new(kind: IssueKind, at_time: i64, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            at_time,
            detail: detail.into(),
            span: None,
        }
    }

    pub fn gap(span: TimeRange, interval: Interval) -> Self {
        let missing = span.bar_count(interval);
        Self {
            span: Some(span),
            ..Self::new(
                IssueKind::Gap,
                span.start,
                format!(
                    "{} missing bar(s) from {} to {}",
                    missing, span.start, span.end
                ),
            )
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} at {}: {}", self.severity, self.kind, self.at_time, self.detail)
    }
}

/// Result of one validation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub symbol: String,
    pub interval: Interval,
    pub record_count: usize,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            record_count: 0,
            issues: Vec::new(),
        }
    }

    /// No error-severity issues (warnings allowed)
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(Issue::is_error)
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    /// Fold another report's findings into this one
    pub fn merge(&mut self, other: ValidationReport) {
        self.record_count += other.record_count;
        self.issues.extend(other.issues);
    }

    /// Open times that carry a bar-level issue at or above `min_severity`.
    /// Gaps and empty-input findings are excluded since they point at bars
    /// that do not exist.
    pub fn flagged_times(&self, min_severity: Severity) -> BTreeSet<i64> {
        self.issues
            .iter()
            .filter(|i| {
                i.severity >= min_severity && !matches!(i.kind, IssueKind::Gap | IssueKind::EmptyData)
            })
            .map(|i| i.at_time)
            .collect()
    }

    /// Open times of rows that are unusable in themselves
    pub fn row_fault_times(&self) -> BTreeSet<i64> {
        self.issues
            .iter()
            .filter(|i| i.kind.is_row_fault())
            .map(|i| i.at_time)
            .collect()
    }

    pub fn gap_spans(&self) -> Vec<TimeRange> {
        self.issues.iter().filter_map(|i| i.span).collect()
    }
}

/// Thresholds for the statistical checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// `|close / prev_close - 1|` above this is an extreme move
    pub price_move_threshold: Decimal,
    /// Volume above `multiplier × trailing median` is a spike
    pub volume_spike_multiplier: Decimal,
    /// Number of preceding bars in the volume median
    pub volume_window: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            price_move_threshold: Decimal::new(5, 1),
            volume_spike_multiplier: Decimal::from(100),
            volume_window: 20,
        }
    }
}

/// Per-row OHLCV invariants, independent of neighbours.
///
/// Alignment is not checked here; misaligned rows never get past parsing
/// or the store.
pub fn row_issues(candle: &Candle) -> Vec<Issue> {
    let mut issues = Vec::new();
    let at = candle.open_time;

    let non_positive: Vec<&str> = [
        ("open", candle.open),
        ("high", candle.high),
        ("low", candle.low),
        ("close", candle.close),
    ]
    .iter()
    .filter(|(_, price)| *price <= Decimal::ZERO)
    .map(|(name, _)| *name)
    .collect();
    if !non_positive.is_empty() {
        issues.push(Issue::new(
            IssueKind::NonPositivePrice,
            at,
            format!("non-positive {}", non_positive.join("/")),
        ));
    }

    if candle.volume < Decimal::ZERO {
        issues.push(Issue::new(
            IssueKind::NegativeVolume,
            at,
            format!("volume {}", candle.volume),
        ));
    }

    let mut broken = Vec::new();
    if candle.high < candle.open.max(candle.close) {
        broken.push(format!(
            "high {} below max(open, close) {}",
            candle.high,
            candle.open.max(candle.close)
        ));
    }
    if candle.low > candle.open.min(candle.close) {
        broken.push(format!(
            "low {} above min(open, close) {}",
            candle.low,
            candle.open.min(candle.close)
        ));
    }
    if candle.high < candle.low {
        broken.push(format!("high {} below low {}", candle.high, candle.low));
    }
    if !broken.is_empty() {
        issues.push(Issue::new(IssueKind::OhlcViolation, at, broken.join("; ")));
    }

    issues
}

fn median(values: &VecDeque<Decimal>) -> Option<Decimal> {
    let mut sorted: Vec<Decimal> = values.iter().copied().filter(|v| *v > Decimal::ZERO).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / Decimal::from(2))
    } else {
        Some(sorted[mid])
    }
}

/// Stateless sequence validator
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(&self, symbol: &str, interval: Interval, candles: &[Candle]) -> ValidationReport {
        if candles.is_empty() {
            let mut report = ValidationReport::new(symbol, interval);
            report.push(Issue::new(IssueKind::EmptyData, 0, "no candles to validate"));
            return report;
        }
        self.validate_with_context(symbol, interval, &[], candles)
    }

    /// Validate `candles` as the continuation of `context`.
    ///
    /// Context rows feed previous-close, gap, duplicate and volume-window
    /// state but never produce issues themselves.
    pub fn validate_with_context(
        &self,
        symbol: &str,
        interval: Interval,
        context: &[Candle],
        candles: &[Candle],
    ) -> ValidationReport {
        let mut report = ValidationReport::new(symbol, interval);
        report.record_count = candles.len();

        let step = interval.duration_ms();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut reported_dups: HashSet<i64> = HashSet::new();
        let mut last_time: Option<i64> = None;
        let mut prev_close: Option<Decimal> = None;
        let mut volumes: VecDeque<Decimal> = VecDeque::with_capacity(self.config.volume_window + 1);

        for (idx, candle) in context.iter().chain(candles).enumerate() {
            let emit = idx >= context.len();
            let mut found: Vec<Issue> = Vec::new();
            let at = candle.open_time;

            if candle.symbol != symbol || candle.interval != interval {
                found.push(Issue::new(
                    IssueKind::KeyMismatch,
                    at,
                    format!(
                        "row is {} {}, expected {} {}",
                        candle.symbol, candle.interval, symbol, interval
                    ),
                ));
            }
            found.extend(row_issues(candle));
            let row_ok = found.is_empty();

            if !seen.insert(at) {
                if reported_dups.insert(at) {
                    found.push(Issue::new(
                        IssueKind::Duplicate,
                        at,
                        format!("open_time {} appears more than once", at),
                    ));
                }
                if emit {
                    report.issues.extend(found);
                }
                continue;
            }

            match last_time {
                Some(last) if at < last => {
                    found.push(Issue::new(
                        IssueKind::OutOfOrder,
                        at,
                        format!("open_time {} follows {}", at, last),
                    ));
                    if emit {
                        report.issues.extend(found);
                    }
                    continue;
                }
                Some(last) if at - last > step => {
                    // last slot on `last`'s grid that is still before `at`
                    let end = last + (at - last - 1) / step * step;
                    found.push(Issue::gap(TimeRange::new(last + step, end), interval));
                }
                _ => {}
            }

            if row_ok {
                if let Some(prev) = prev_close.filter(|p| *p > Decimal::ZERO) {
                    if let Some(ratio) = candle.close.checked_div(prev) {
                        let change = ratio - Decimal::ONE;
                        if change.abs() > self.config.price_move_threshold {
                            found.push(Issue::new(
                                IssueKind::ExtremePriceMove,
                                at,
                                format!(
                                    "close {} moved {}% from previous close {}",
                                    candle.close,
                                    (change * Decimal::from(100)).round_dp(2),
                                    prev
                                ),
                            ));
                        }
                    }
                }

                if let Some(med) = median(&volumes) {
                    let limit = med.checked_mul(self.config.volume_spike_multiplier);
                    if limit.is_some_and(|limit| candle.volume > limit) {
                        found.push(Issue::new(
                            IssueKind::ExtremeVolume,
                            at,
                            format!(
                                "volume {} exceeds {}x trailing median {}",
                                candle.volume, self.config.volume_spike_multiplier, med
                            ),
                        ));
                    }
                }

                prev_close = Some(candle.close);
                if self.config.volume_window > 0 {
                    volumes.push_back(candle.volume);
                    if volumes.len() > self.config.volume_window {
                        volumes.pop_front();
                    }
                }
            }

            last_time = Some(at);
            if emit {
                report.issues.extend(found);
            }
        }

        report
    }
}
