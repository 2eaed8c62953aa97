//! # harmonix - harmonic pattern detection and walk-forward replay
//!
//! Detects X-A-B-C-D and A-B-C-D harmonic structures in a bar series, tracks
//! every candidate from "potential" to "confirmed/failed", and replays history
//! bar by bar to evaluate a strategy built on them without look-ahead.
//!
//! ## Quick Start
//!
//! ```rust
//! use harmonix::prelude::*;
//!
//! // Any type implementing OHLCV can be scanned; `Bar` is provided.
//! let bars: Vec<Bar> = (0..64)
//!     .map(|i| {
//!         let p = 100.0 + ((i as f64) * 0.4).sin() * 10.0;
//!         Bar::new(i as i64, p, p + 1.0, p - 1.0, p, 1000.0)
//!     })
//!     .collect();
//!
//! // One-shot detection
//! let extremums = extract(&bars, 3);
//! let found = match_patterns(&extremums, &bars, &Catalog::harmonic(), &MatchOptions::default());
//! assert!(found.formed.len() + found.unformed.len() < 10_000);
//!
//! // Walk-forward replay
//! let stats = run(&bars, &BacktestParams::default()).unwrap();
//! assert_eq!(stats.bars_processed, bars.len() - 1);
//! ```

pub mod alerts;
pub mod backtest;
pub mod catalog;
pub mod extremum;
pub mod matcher;
pub mod params;
pub mod record;
pub mod tracker;

pub mod prelude {
    pub use crate::{
        // Alerts
        alerts::{dispatch, AlertLedger, InMemoryAlertLedger},
        // Walk-forward
        backtest::{
            run, BacktestStatistics, CancelFlag, EquitySample, ExitReason, Side, Stage,
            TradeResult, TradeSignal, WalkForwardEngine,
        },
        // Catalog
        catalog::{Catalog, PatternDefinition, RatioRange},
        // Extremums
        extremum::{extract, ExtremumCache, ExtremumPoint},
        // Matcher
        matcher::{match_patterns, LegSpan, MatchOptions, MatchResult},
        // Parameters
        params::{BacktestParams, ParamMeta, ParamType},
        // Records
        record::{
            LegRatios, Orientation, PatternIdentity, PatternKind, PatternPoint, PatternRecord,
            PriceZone, Projection, TrackingKey,
        },
        // Tracker
        tracker::{
            DismissalReason, PatternStatus, PatternTracker, StatusTransition, TrackedId,
            TrackedPattern, TrackingWarning, WarningKind, ZoneEntry, ZoneOutcome,
        },
        // Parallel
        run_parallel,
        // Bars
        Bar,
        // Errors
        HarmonicError,
        OHLCVExt,
        Period,
        Ratio,
        Result,
        RunFailure,
        RunReport,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, HarmonicError>;

/// Errors surfaced by configuration, input validation and replay
#[derive(Debug, Clone, thiserror::Error)]
pub enum HarmonicError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Timestamp at index {index} ({current}) does not follow {previous}")]
    NonMonotonicTimestamp {
        index: usize,
        previous: i64,
        current: i64,
    },

    #[error("Run cancelled at bar {bar} before {stage}")]
    Cancelled { bar: usize, stage: backtest::Stage },

    #[error("Run aborted at bar {bar} during {stage}: {source}")]
    Aborted {
        bar: usize,
        stage: backtest::Stage,
        #[source]
        source: Box<HarmonicError>,
    },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(HarmonicError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(HarmonicError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Bar count (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(HarmonicError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// True when the bar's [low, high] range intersects [lo, hi]
    #[inline]
    fn overlaps(&self, lo: f64, hi: f64) -> bool {
        self.low() <= hi && self.high() >= lo
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        if self.open().is_nan()
            || self.high().is_nan()
            || self.low().is_nan()
            || self.close().is_nan()
        {
            return Err(HarmonicError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if self.open().is_infinite()
            || self.high().is_infinite()
            || self.low().is_infinite()
            || self.close().is_infinite()
        {
            return Err(HarmonicError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.low() {
            return Err(HarmonicError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// Plain bar record; timestamps are caller-defined units (e.g. epoch millis)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Bar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.timestamp)
    }
}

/// Validate the bar at `index` and its timestamp ordering against `index - 1`.
pub fn validate_bar<T: OHLCV>(bars: &[T], index: usize) -> Result<()> {
    let Some(bar) = bars.get(index) else {
        return Err(HarmonicError::InsufficientData {
            need: index + 1,
            got: bars.len(),
        });
    };
    bar.validate().map_err(|e| match e {
        HarmonicError::InvalidOHLCV { reason, .. } => HarmonicError::InvalidOHLCV { index, reason },
        other => other,
    })?;
    if index > 0 {
        if let (Some(previous), Some(current)) = (bars[index - 1].timestamp(), bar.timestamp()) {
            if current <= previous {
                return Err(HarmonicError::NonMonotonicTimestamp {
                    index,
                    previous,
                    current,
                });
            }
        }
    }
    Ok(())
}

/// Validate a whole series, reporting the first offending bar.
pub fn validate_series<T: OHLCV>(bars: &[T]) -> Result<()> {
    (0..bars.len()).try_for_each(|i| validate_bar(bars, i))
}

// ============================================================
// PARALLEL RUNS
// ============================================================

use rayon::prelude::*;

/// Concurrent runs allowed by [`run_parallel`] unless overridden
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 2;

/// Result of replaying a single instrument
#[derive(Debug)]
pub struct RunReport {
    pub symbol: String,
    pub statistics: backtest::BacktestStatistics,
}

/// Error from replaying a single instrument
#[derive(Debug)]
pub struct RunFailure {
    pub symbol: String,
    pub error: HarmonicError,
}

/// Replay several instruments on a bounded thread pool.
///
/// Each run owns its own engine, caches and tracker; a failing run is
/// reported in the error list and never touches the others.
pub fn run_parallel<'a, T, I>(
    params: &params::BacktestParams,
    instruments: I,
    max_concurrent: usize,
) -> Result<(Vec<RunReport>, Vec<RunFailure>)>
where
    T: OHLCV + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a [T])> + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_concurrent.max(1))
        .build()
        .map_err(|e| HarmonicError::InvalidConfig(format!("thread pool: {e}")))?;

    let results: Vec<_> = pool.install(|| {
        instruments
            .into_par_iter()
            .map(|(symbol, bars)| {
                backtest::run(bars, params)
                    .map(|statistics| RunReport {
                        symbol: symbol.to_string(),
                        statistics,
                    })
                    .map_err(|error| RunFailure {
                        symbol: symbol.to_string(),
                        error,
                    })
            })
            .collect()
    });

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    Ok((successes, errors))
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn zigzag(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let p = 100.0 + ((i as f64) * 0.5).sin() * 8.0;
                Bar::new(i as i64 * 60, p, p + 0.5, p - 0.5, p, 1000.0)
            })
            .collect()
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(100).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_bar_overlap() {
        let bar = Bar::new(0, 100.0, 110.0, 90.0, 105.0, 1.0);
        assert_eq!(bar.range(), 20.0);
        assert!(bar.overlaps(85.0, 90.0));
        assert!(bar.overlaps(95.0, 96.0));
        assert!(!bar.overlaps(110.5, 120.0));
    }

    #[test]
    fn test_validate_series_reports_nan_index() {
        let mut bars = zigzag(10);
        bars[6].close = f64::NAN;
        match validate_series(&bars) {
            Err(HarmonicError::InvalidOHLCV { index, .. }) => assert_eq!(index, 6),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validate_series_reports_timestamp_regression() {
        let mut bars = zigzag(10);
        bars[4].timestamp = bars[3].timestamp;
        match validate_series(&bars) {
            Err(HarmonicError::NonMonotonicTimestamp { index, .. }) => assert_eq!(index, 4),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parallel_runs() {
        let bars1 = zigzag(80);
        let bars2 = zigzag(60);
        let mut broken = zigzag(40);
        broken[20].high = f64::NAN;

        let instruments: Vec<(&str, &[Bar])> =
            vec![("AAA", &bars1), ("BBB", &bars2), ("BAD", &broken)];

        let params = params::BacktestParams::default();
        let (results, errors) =
            run_parallel(&params, instruments, DEFAULT_MAX_CONCURRENT_RUNS).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol, "BAD");
    }
}
