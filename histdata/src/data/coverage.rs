//! Coverage arithmetic over interval-aligned open times
//!
//! All ranges here are inclusive on both ends and hold open times, so a
//! single bar at `t` is the range `[t, t]`.

use crate::data::Interval;
use serde::{Deserialize, Serialize};

/// Inclusive span of interval-aligned open times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts <= self.end
    }

    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(TimeRange { start, end })
    }

    pub fn bar_count(&self, interval: Interval) -> i64 {
        interval.bar_count(self.start, self.end)
    }
}

/// Contiguous, gap-free run of cached bars for one symbol/interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRange {
    pub symbol: String,
    pub interval: Interval,
    pub start_time: i64,
    pub end_time: i64,
}

impl CoverageRange {
    pub fn span(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn bar_count(&self) -> i64 {
        self.interval.bar_count(self.start_time, self.end_time)
    }
}

/// Group ascending open times into runs where neighbours are exactly one
/// step apart. Repeated timestamps collapse into the same run.
pub fn group_contiguous(open_times: &[i64], step: i64) -> Vec<TimeRange> {
    let mut runs: Vec<TimeRange> = Vec::new();
    for &ts in open_times {
        match runs.last_mut() {
            Some(run) if ts <= run.end => {}
            Some(run) if ts - run.end == step => run.end = ts,
            _ => runs.push(TimeRange::new(ts, ts)),
        }
    }
    runs
}

/// `span` minus the union of `covered`, in `step` units.
///
/// `covered` must be ascending and non-overlapping (as produced by
/// [`group_contiguous`]); `span` bounds must be aligned to `step`.
pub fn subtract(span: TimeRange, covered: &[TimeRange], step: i64) -> Vec<TimeRange> {
    let mut missing = Vec::new();
    if span.end < span.start {
        return missing;
    }

    let mut cursor = span.start;
    for range in covered {
        if range.end < cursor {
            continue;
        }
        if range.start > span.end {
            break;
        }
        if range.start > cursor {
            missing.push(TimeRange::new(cursor, range.start - step));
        }
        cursor = range.end + step;
        if cursor > span.end {
            return missing;
        }
    }

    if cursor <= span.end {
        missing.push(TimeRange::new(cursor, span.end));
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const STEP: i64 = 900_000;

    fn r(start: i64, end: i64) -> TimeRange {
        TimeRange::new(start * STEP, end * STEP)
    }

    #[test]
    fn test_group_contiguous() {
        let times: Vec<i64> = [0, 1, 2, 5, 6, 9].iter().map(|t| t * STEP).collect();
        assert_eq!(
            group_contiguous(&times, STEP),
            vec![r(0, 2), r(5, 6), r(9, 9)]
        );
        assert!(group_contiguous(&[], STEP).is_empty());
    }

    #[test]
    fn test_group_contiguous_collapses_repeats() {
        let times: Vec<i64> = [0, 1, 1, 2].iter().map(|t| t * STEP).collect();
        assert_eq!(group_contiguous(&times, STEP), vec![r(0, 2)]);
    }

    #[test]
    fn test_subtract_empty_coverage() {
        assert_eq!(subtract(r(0, 95), &[], STEP), vec![r(0, 95)]);
    }

    #[test]
    fn test_subtract_boundaries() {
        let covered = vec![r(0, 10), r(20, 30)];
        assert_eq!(subtract(r(0, 30), &covered, STEP), vec![r(11, 19)]);
        assert_eq!(subtract(r(5, 25), &covered, STEP), vec![r(11, 19)]);
        assert_eq!(subtract(r(10, 20), &covered, STEP), vec![r(11, 19)]);
        assert_eq!(subtract(r(11, 19), &covered, STEP), vec![r(11, 19)]);
        assert_eq!(
            subtract(r(-5, 35), &covered, STEP),
            vec![r(-5, -1), r(11, 19), r(31, 35)]
        );
        assert!(subtract(r(0, 10), &covered, STEP).is_empty());
        assert!(subtract(r(22, 22), &covered, STEP).is_empty());
    }

    #[test]
    fn test_subtract_single_bar_hole() {
        let covered = vec![r(0, 4), r(6, 9)];
        assert_eq!(subtract(r(0, 9), &covered, STEP), vec![r(5, 5)]);
    }

    #[test]
    fn test_intersect() {
        assert_eq!(r(0, 10).intersect(&r(5, 20)), Some(r(5, 10)));
        assert_eq!(r(0, 10).intersect(&r(10, 20)), Some(r(10, 10)));
        assert_eq!(r(0, 10).intersect(&r(11, 20)), None);
    }

    proptest! {
        #[test]
        fn prop_missing_and_coverage_partition_span(
            stored in proptest::collection::btree_set(-50i64..150, 0..120),
            a in -60i64..160,
            len in 0i64..120,
        ) {
            let times: Vec<i64> = stored.iter().map(|t| t * STEP).collect();
            let span = r(a, a + len);
            let covered = group_contiguous(&times, STEP);
            let missing = subtract(span, &covered, STEP);

            let mut seen = BTreeSet::new();
            for range in covered.iter().filter_map(|c| c.intersect(&span)).chain(missing.iter().copied()) {
                let mut t = range.start;
                while t <= range.end {
                    prop_assert!(seen.insert(t), "slot {} counted twice", t);
                    t += STEP;
                }
            }
            let expected: BTreeSet<i64> = (a..=a + len).map(|t| t * STEP).collect();
            prop_assert_eq!(seen, expected);

            for range in &missing {
                let mut t = range.start;
                while t <= range.end {
                    prop_assert!(!stored.contains(&(t / STEP)));
                    t += STEP;
                }
            }
        }
    }
}
