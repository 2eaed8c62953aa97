//! Detection caching for the walk-forward loop
//!
//! Extremums are keyed by detection slice end and refreshed every bar.
//! Pattern detection is keyed by the bar it ran at and reused until
//! `detection_interval` bars have elapsed.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::extremum::{ExtremumCache, ExtremumPoint};
use crate::matcher::{match_patterns, MatchOptions, MatchResult};
use crate::OHLCV;

/// Slice ends retained; the loop only ever asks for the newest one or two
const EXTREMUM_CAPACITY: usize = 4;

#[derive(Debug)]
pub(crate) struct DetectionCache {
    extremums: ExtremumCache,
    interval: usize,
    last: Option<(usize, Arc<MatchResult>)>,
    runs: usize,
}

impl DetectionCache {
    pub(crate) fn new(window: usize, interval: usize) -> Self {
        Self {
            extremums: ExtremumCache::new(window, EXTREMUM_CAPACITY),
            interval: interval.max(1),
            last: None,
            runs: 0,
        }
    }

    pub(crate) fn extremums<T: OHLCV>(&mut self, bars: &[T], end: usize) -> Arc<Vec<ExtremumPoint>> {
        self.extremums.get_or_compute(bars, end)
    }

    /// Matcher output for `bar_index` and whether it was computed on this call
    pub(crate) fn detect<T: OHLCV>(
        &mut self,
        bar_index: usize,
        slice: &[T],
        extremums: &[ExtremumPoint],
        catalog: &Catalog,
        options: &MatchOptions,
    ) -> (Arc<MatchResult>, bool) {
        if let Some((at, result)) = &self.last {
            if bar_index.saturating_sub(*at) < self.interval {
                return (Arc::clone(result), false);
            }
        }
        let result = Arc::new(match_patterns(extremums, slice, catalog, options));
        self.last = Some((bar_index, Arc::clone(&result)));
        self.runs += 1;
        (result, true)
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs
    }

    pub(crate) fn clear(&mut self) {
        self.extremums.clear();
        self.last = None;
        self.runs = 0;
    }
}
