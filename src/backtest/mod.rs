//! Walk-forward replay
//!
//! For each bar `i` after the first, strictly in this order:
//!
//! 1. Validation: reject NaN/inverted bars and timestamp regressions.
//! 2. Detection: extremums and patterns from `bars[..i - future_buffer]`,
//!    re-matched every `detection_interval` bars.
//! 3. Tracking: revise pending patterns, ingest fresh matches, then advance
//!    every live pattern on bar `i`.
//! 4. Signals: newly pending patterns above the score floor become limit orders.
//! 5. Execution: fill signals inside bar `i`'s range, then manage open trades.
//! 6. Accounting: append an equity sample.
//!
//! Cancellation is checked before each step. Open trades are closed at the
//! final close when the data ends.

mod cache;
mod stats;
mod trades;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::params::BacktestParams;
use crate::tracker::{PatternStatus, PatternTracker, StatusTransition};
use crate::{validate_bar, HarmonicError, Result, OHLCV};

use cache::DetectionCache;

pub use stats::{BacktestStatistics, PatternBreakdown};
pub use trades::{ExitReason, OpenTrade, Side, TradeResult, TradeSignal};

// ============================================================
// CONTROL
// ============================================================

/// Step of the per-bar loop, reported by cancellation and abort errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Detection,
    Tracking,
    Signals,
    Execution,
    Accounting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validation => "validation",
            Stage::Detection => "detection",
            Stage::Tracking => "tracking",
            Stage::Signals => "signals",
            Stage::Execution => "execution",
            Stage::Accounting => "accounting",
        };
        f.write_str(name)
    }
}

/// Shared flag for cooperative cancellation; clones observe the same flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquitySample {
    pub bar_index: usize,
    /// Capital plus realized and unrealized PnL at the bar's close
    pub equity: f64,
    pub open_trades: usize,
}

// ============================================================
// ENGINE
// ============================================================

/// Replays one instrument. State from the last run (including an aborted
/// one) stays readable until the next call to [`run`](Self::run).
#[derive(Debug)]
pub struct WalkForwardEngine {
    params: BacktestParams,
    catalog: Catalog,
    cancel: Option<CancelFlag>,
    tracker: PatternTracker,
    cache: DetectionCache,
    signals: Vec<TradeSignal>,
    open: Vec<OpenTrade>,
    trades: Vec<TradeResult>,
    equity_curve: Vec<EquitySample>,
    transitions: Vec<StatusTransition>,
    realized: f64,
    progress: Option<usize>,
}

impl WalkForwardEngine {
    pub fn new(params: BacktestParams) -> Result<Self> {
        params.validate()?;
        let catalog = Catalog::default();
        Ok(Self {
            cache: DetectionCache::new(params.extremum_window.get(), params.detection_interval.get()),
            tracker: PatternTracker::new(catalog.clone()),
            catalog,
            params,
            cancel: None,
            signals: Vec::new(),
            open: Vec::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            transitions: Vec::new(),
            realized: 0.0,
            progress: None,
        })
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.tracker = PatternTracker::new(catalog.clone());
        self.catalog = catalog;
        self
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn params(&self) -> &BacktestParams {
        &self.params
    }

    pub fn tracker(&self) -> &PatternTracker {
        &self.tracker
    }

    /// Closed trades
    pub fn trades(&self) -> &[TradeResult] {
        &self.trades
    }

    pub fn open_trades(&self) -> &[OpenTrade] {
        &self.open
    }

    pub fn equity_curve(&self) -> &[EquitySample] {
        &self.equity_curve
    }

    /// Every status transition of the run, in order
    pub fn transitions(&self) -> &[StatusTransition] {
        &self.transitions
    }

    /// Last bar fully processed
    pub fn progress(&self) -> Option<usize> {
        self.progress
    }

    fn reset(&mut self) {
        self.tracker.clear();
        self.cache.clear();
        self.signals.clear();
        self.open.clear();
        self.trades.clear();
        self.equity_curve.clear();
        self.transitions.clear();
        self.realized = 0.0;
        self.progress = None;
    }

    pub fn run<T: OHLCV>(&mut self, bars: &[T]) -> Result<BacktestStatistics> {
        self.reset();
        if bars.is_empty() {
            return Err(HarmonicError::InsufficientData { need: 1, got: 0 });
        }
        validate_bar(bars, 0).map_err(|e| aborted(0, Stage::Validation, e))?;
        self.progress = Some(0);

        info!(
            bars = bars.len(),
            extremum_window = self.params.extremum_window.get(),
            detection_interval = self.params.detection_interval.get(),
            future_buffer = self.params.future_buffer,
            max_leg_span = %self.params.max_leg_span,
            "walk-forward run started"
        );

        for i in 1..bars.len() {
            self.step(bars, i)?;
            self.progress = Some(i);
        }

        let last = bars.len() - 1;
        self.close_all(last, bars[last].close());

        let stats = BacktestStatistics::compute(
            bars.len() - 1,
            self.cache.runs(),
            self.params.initial_capital,
            &self.trades,
            &self.equity_curve,
            &self.tracker,
        );
        info!(
            trades = stats.trades,
            patterns = stats.patterns_tracked,
            zone_entries = stats.zone_entries,
            zone_success_rate = ?stats.zone_success_rate,
            total_return_pct = stats.total_return_pct,
            warnings = stats.warnings.len(),
            "walk-forward run finished"
        );
        Ok(stats)
    }

    fn checkpoint(&self, bar: usize, stage: Stage) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.is_cancelled() => Err(HarmonicError::Cancelled { bar, stage }),
            _ => Ok(()),
        }
    }

    fn step<T: OHLCV>(&mut self, bars: &[T], i: usize) -> Result<()> {
        self.checkpoint(i, Stage::Validation)?;
        validate_bar(bars, i).map_err(|e| aborted(i, Stage::Validation, e))?;

        self.checkpoint(i, Stage::Detection)?;
        let end = i.saturating_sub(self.params.future_buffer);
        let slice = &bars[..end];
        let extremums = self.cache.extremums(bars, end);
        let options = self.params.match_options();
        let (detected, fresh) = self.cache.detect(i, slice, &extremums, &self.catalog, &options);

        self.checkpoint(i, Stage::Tracking)?;
        let fresh = fresh.then_some(&*detected);
        self.tracker.step(fresh, i, &bars[..=i], &extremums);
        let transitions = self.tracker.drain_transitions();
        self.transitions.extend(transitions);

        self.checkpoint(i, Stage::Signals)?;
        self.collect_signals(i);

        self.checkpoint(i, Stage::Execution)?;
        self.trigger_signals(i, &bars[i]);
        self.manage_trades(i, &bars[i]);

        self.checkpoint(i, Stage::Accounting)?;
        let close = bars[i].close();
        let unrealized: f64 = self.open.iter().map(|t| t.unrealized(close)).sum();
        self.equity_curve.push(EquitySample {
            bar_index: i,
            equity: self.params.initial_capital + self.realized + unrealized,
            open_trades: self.open.len(),
        });
        Ok(())
    }

    fn collect_signals(&mut self, i: usize) {
        let min_score = self.params.min_pattern_score.get();
        for id in self.tracker.take_newly_pending() {
            let Some(pattern) = self.tracker.get(id) else {
                continue;
            };
            let live = matches!(pattern.status(), PatternStatus::Pending | PatternStatus::InZone);
            if !live || !pattern.signal_eligible() || pattern.score() < min_score {
                continue;
            }
            if let Some(signal) = TradeSignal::from_pattern(pattern, &self.params, i) {
                self.signals.push(signal);
            }
        }

        let tracker = &self.tracker;
        self.signals.retain(|s| {
            tracker
                .get(s.pattern)
                .is_some_and(|p| matches!(p.status(), PatternStatus::Pending | PatternStatus::InZone))
        });
    }

    fn trigger_signals<T: OHLCV>(&mut self, i: usize, bar: &T) {
        let mut waiting = Vec::with_capacity(self.signals.len());
        for signal in std::mem::take(&mut self.signals) {
            if self.open.len() >= self.params.max_open_trades || !signal.triggers(bar) {
                waiting.push(signal);
                continue;
            }
            let equity = self.params.initial_capital + self.realized;
            let quantity = equity * self.params.position_size_fraction.get() / signal.entry;
            if !(quantity.is_finite() && quantity > 0.0) {
                continue;
            }
            debug!(
                pattern = signal.name,
                side = ?signal.side,
                bar = i,
                entry = signal.entry,
                stop = signal.stop,
                target = signal.target,
                "trade opened"
            );
            self.open.push(OpenTrade { signal, entry_bar: i, quantity });
        }
        self.signals = waiting;
    }

    fn manage_trades<T: OHLCV>(&mut self, i: usize, bar: &T) {
        let mut still_open = Vec::with_capacity(self.open.len());
        for trade in std::mem::take(&mut self.open) {
            if trade.entry_bar >= i {
                still_open.push(trade);
                continue;
            }
            let status = self.tracker.get(trade.signal.pattern).map(|p| p.status());
            match trade.exit_on(bar, status) {
                Some((reason, price)) => self.record_close(trade, i, price, reason),
                None => still_open.push(trade),
            }
        }
        self.open = still_open;
    }

    fn close_all(&mut self, last: usize, price: f64) {
        for trade in std::mem::take(&mut self.open) {
            self.record_close(trade, last, price, ExitReason::EndOfData);
        }
    }

    fn record_close(&mut self, trade: OpenTrade, bar: usize, price: f64, reason: ExitReason) {
        let result = trade.close(bar, price, reason);
        self.realized += result.pnl;
        debug!(
            pattern = result.name,
            bar,
            exit = price,
            pnl = result.pnl,
            reason = ?reason,
            "trade closed"
        );
        self.trades.push(result);
    }
}

fn aborted(bar: usize, stage: Stage, source: HarmonicError) -> HarmonicError {
    HarmonicError::Aborted { bar, stage, source: Box::new(source) }
}

/// Replay `bars` with a fresh engine and the builtin catalog
pub fn run<T: OHLCV>(bars: &[T], params: &BacktestParams) -> Result<BacktestStatistics> {
    WalkForwardEngine::new(params.clone())?.run(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;

    fn wave(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                let p = 100.0 + (t * 0.35).sin() * 12.0 + (t * 0.11).cos() * 5.0;
                Bar::new(i as i64, p, p + 0.8, p - 0.8, p + 0.2, 1.0)
            })
            .collect()
    }

    #[test]
    fn test_cancelled_before_first_step() {
        let flag = CancelFlag::new();
        flag.cancel();
        let mut engine = WalkForwardEngine::new(BacktestParams::default())
            .unwrap()
            .with_cancel_flag(flag);
        match engine.run(&wave(50)) {
            Err(HarmonicError::Cancelled { bar, stage }) => {
                assert_eq!(bar, 1);
                assert_eq!(stage, Stage::Validation);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(engine.progress(), Some(0));
    }

    #[test]
    fn test_abort_keeps_progress() {
        let mut bars = wave(60);
        bars[40].low = bars[40].high + 1.0;
        let mut engine = WalkForwardEngine::new(BacktestParams::default()).unwrap();
        match engine.run(&bars) {
            Err(HarmonicError::Aborted { bar, stage, .. }) => {
                assert_eq!(bar, 40);
                assert_eq!(stage, Stage::Validation);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(engine.progress(), Some(39));
        assert_eq!(engine.equity_curve().len(), 39);
    }

    #[test]
    fn test_empty_series() {
        let bars: Vec<Bar> = Vec::new();
        assert!(matches!(
            run(&bars, &BacktestParams::default()),
            Err(HarmonicError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_equity_curve_covers_every_bar() {
        let bars = wave(120);
        let mut engine = WalkForwardEngine::new(BacktestParams::default()).unwrap();
        let stats = engine.run(&bars).unwrap();
        assert_eq!(stats.bars_processed, 119);
        assert_eq!(engine.equity_curve().len(), 119);
        assert!(engine.open_trades().is_empty());
        assert!((stats.final_equity - (10_000.0 + stats.total_pnl)).abs() < 1e-6);
    }
}
