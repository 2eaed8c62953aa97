//! Swing-point extraction
//!
//! A bar is a swing high when its high beats every other high within
//! `window` bars on either side; lows are symmetric. Windows are clamped at
//! the start of the series, but a bar needs `window` following bars before it
//! can qualify, so the most recent `window` bars never produce an extremum.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::OHLCV;

/// A confirmed local turning point
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExtremumPoint {
    pub bar_index: usize,
    pub price: f64,
    pub is_high: bool,
}

/// Extract swing highs and lows ordered by bar index.
///
/// Equal prices inside a window resolve to the earliest bar: a candidate
/// must be strictly more extreme than the bars before it and at least as
/// extreme as the bars after it. When one bar is both, the high is emitted
/// first.
pub fn extract<T: OHLCV>(bars: &[T], window: usize) -> Vec<ExtremumPoint> {
    let window = window.max(1);
    let len = bars.len();
    if len <= window {
        return Vec::new();
    }

    let mut points = Vec::new();
    for i in 0..len - window {
        let start = i.saturating_sub(window);
        let end = i + window;

        let high = bars[i].high();
        let is_high = bars[start..i].iter().all(|b| high > b.high())
            && bars[i + 1..=end].iter().all(|b| high >= b.high());
        if is_high {
            points.push(ExtremumPoint {
                bar_index: i,
                price: high,
                is_high: true,
            });
        }

        let low = bars[i].low();
        let is_low = bars[start..i].iter().all(|b| low < b.low())
            && bars[i + 1..=end].iter().all(|b| low <= b.low());
        if is_low {
            points.push(ExtremumPoint {
                bar_index: i,
                price: low,
                is_high: false,
            });
        }
    }
    points
}

// ============================================================
// CACHE
// ============================================================

/// Extremum lists keyed by the exclusive end index of the slice they came from.
///
/// Entries are never patched: a longer slice is a new key. Only the most
/// recent `capacity` keys are retained.
#[derive(Debug, Clone)]
pub struct ExtremumCache {
    window: usize,
    capacity: usize,
    entries: BTreeMap<usize, Arc<Vec<ExtremumPoint>>>,
    hits: usize,
    misses: usize,
}

impl ExtremumCache {
    pub fn new(window: usize, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            entries: BTreeMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Extremums of `bars[..end]`, computed on first request for `end`.
    pub fn get_or_compute<T: OHLCV>(&mut self, bars: &[T], end: usize) -> Arc<Vec<ExtremumPoint>> {
        let end = end.min(bars.len());
        if let Some(hit) = self.entries.get(&end) {
            self.hits += 1;
            return Arc::clone(hit);
        }
        self.misses += 1;
        let points = Arc::new(extract(&bars[..end], self.window));
        self.entries.insert(end, Arc::clone(&points));
        while self.entries.len() > self.capacity {
            self.entries.pop_first();
        }
        points
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since construction or the last clear
    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;

    fn bars_from_highs_lows(points: &[(f64, f64)]) -> Vec<Bar> {
        points
            .iter()
            .enumerate()
            .map(|(i, &(h, l))| Bar::new(i as i64, (h + l) / 2.0, h, l, (h + l) / 2.0, 1.0))
            .collect()
    }

    #[test]
    fn test_simple_peak_and_trough() {
        let bars = bars_from_highs_lows(&[
            (10.0, 9.0),
            (12.0, 11.0),
            (15.0, 14.0),
            (12.0, 11.0),
            (8.0, 7.0),
            (10.0, 9.0),
            (11.0, 10.0),
        ]);
        let points = extract(&bars, 1);
        assert_eq!(
            points,
            vec![
                ExtremumPoint { bar_index: 0, price: 9.0, is_high: false },
                ExtremumPoint { bar_index: 2, price: 15.0, is_high: true },
                ExtremumPoint { bar_index: 4, price: 7.0, is_high: false },
            ]
        );
    }

    #[test]
    fn test_tail_bars_are_unconfirmed() {
        let bars = bars_from_highs_lows(&[(10.0, 9.0), (11.0, 10.0), (12.0, 11.0), (20.0, 19.0)]);
        let points = extract(&bars, 2);
        assert!(points.iter().all(|p| p.bar_index < 2));
    }

    #[test]
    fn test_ties_resolve_to_earliest() {
        let bars = bars_from_highs_lows(&[
            (10.0, 9.0),
            (15.0, 11.0),
            (15.0, 11.0),
            (12.0, 10.0),
            (11.0, 9.5),
        ]);
        let highs: Vec<_> = extract(&bars, 1).into_iter().filter(|p| p.is_high).collect();
        assert_eq!(highs.len(), 1);
        assert_eq!(highs[0].bar_index, 1);
    }

    #[test]
    fn test_outside_bar_is_high_and_low() {
        let bars = bars_from_highs_lows(&[(10.0, 9.0), (20.0, 1.0), (11.0, 9.5)]);
        let points = extract(&bars, 1);
        let at_one: Vec<_> = points.iter().filter(|p| p.bar_index == 1).collect();
        assert_eq!(at_one.len(), 2);
        assert!(at_one[0].is_high);
        assert!(!at_one[1].is_high);
    }

    #[test]
    fn test_short_series_is_empty() {
        let bars = bars_from_highs_lows(&[(10.0, 9.0), (11.0, 10.0)]);
        assert!(extract(&bars, 3).is_empty());
        let empty: Vec<Bar> = Vec::new();
        assert!(extract(&empty, 1).is_empty());
    }

    #[test]
    fn test_cache_hits_and_eviction() {
        let bars = bars_from_highs_lows(&[
            (10.0, 9.0),
            (12.0, 11.0),
            (15.0, 14.0),
            (12.0, 11.0),
            (8.0, 7.0),
            (10.0, 9.0),
        ]);
        let mut cache = ExtremumCache::new(1, 2);
        let first = cache.get_or_compute(&bars, 4);
        let again = cache.get_or_compute(&bars, 4);
        assert!(Arc::ptr_eq(&first, &again));
        cache.get_or_compute(&bars, 5);
        cache.get_or_compute(&bars, 6);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats(), (1, 3));
    }

    #[test]
    fn test_prefix_extraction_matches_slice() {
        let bars: Vec<Bar> = (0..40)
            .map(|i| {
                let p = 50.0 + ((i as f64) * 0.7).sin() * 5.0;
                Bar::new(i, p, p + 0.3, p - 0.3, p, 1.0)
            })
            .collect();
        let mut cache = ExtremumCache::new(2, 4);
        assert_eq!(*cache.get_or_compute(&bars, 25), extract(&bars[..25], 2));
    }
}
