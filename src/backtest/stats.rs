//! Run statistics, computed once from the final trade list and tracker state

use std::collections::BTreeMap;

use serde::Serialize;

use super::trades::TradeResult;
use super::EquitySample;
use crate::tracker::{PatternStatus, PatternTracker, TrackingWarning, ZoneOutcome};

/// Counts for one pattern name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternBreakdown {
    pub tracked: usize,
    pub success: usize,
    pub invalid_prz: usize,
    pub failed_prz: usize,
    pub dismissed: usize,
    pub zone_entries: usize,
    pub successful_zone_entries: usize,
    pub invalid_zone_entries: usize,
    pub trades: usize,
    pub pnl: f64,
}

impl PatternBreakdown {
    pub fn zone_success_rate(&self) -> Option<f64> {
        rate(self.successful_zone_entries, self.successful_zone_entries + self.invalid_zone_entries)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestStatistics {
    pub bars_processed: usize,
    pub detections_run: usize,

    // Trades
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Option<f64>,
    pub total_pnl: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    /// Gross profit over gross loss; `None` without losing trades
    pub profit_factor: Option<f64>,
    pub avg_trade_return_pct: Option<f64>,

    // Patterns
    pub patterns_tracked: usize,
    pub pending: usize,
    pub in_zone: usize,
    pub success: usize,
    pub invalid_prz: usize,
    pub failed_prz: usize,
    pub dismissed: usize,
    /// success / (success + invalid_prz + failed_prz), for reference
    pub pattern_success_rate: Option<f64>,
    pub avg_bars_to_failure: Option<f64>,

    // Zone entries
    pub zone_entries: usize,
    pub successful_zone_entries: usize,
    pub invalid_zone_entries: usize,
    /// successful / (successful + invalid); the authoritative rate
    pub zone_success_rate: Option<f64>,

    pub by_pattern: BTreeMap<&'static str, PatternBreakdown>,
    pub warnings: Vec<TrackingWarning>,
}

fn rate(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

impl BacktestStatistics {
    pub(crate) fn compute(
        bars_processed: usize,
        detections_run: usize,
        initial_capital: f64,
        trades: &[TradeResult],
        equity_curve: &[EquitySample],
        tracker: &PatternTracker,
    ) -> Self {
        let mut by_pattern: BTreeMap<&'static str, PatternBreakdown> = BTreeMap::new();

        // Trades
        let wins = trades.iter().filter(|t| t.is_win()).count();
        let losses = trades.iter().filter(|t| t.pnl < 0.0).count();
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let gross_loss: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| -t.pnl).sum();
        let final_equity = initial_capital + total_pnl;
        for t in trades {
            let entry = by_pattern.entry(t.name).or_default();
            entry.trades += 1;
            entry.pnl += t.pnl;
        }

        // Patterns and zone entries
        let mut status_counts = [0usize; 6];
        let mut entry_counts = (0usize, 0usize, 0usize);
        let mut failure_bars = Vec::new();
        for p in tracker.patterns() {
            let slot = by_pattern.entry(p.name()).or_default();
            slot.tracked += 1;
            let status_slot = match p.status() {
                PatternStatus::Pending => 0,
                PatternStatus::InZone => 1,
                PatternStatus::Success => {
                    slot.success += 1;
                    2
                }
                PatternStatus::InvalidPrz => {
                    slot.invalid_prz += 1;
                    3
                }
                PatternStatus::FailedPrz => {
                    slot.failed_prz += 1;
                    4
                }
                PatternStatus::Dismissed => {
                    slot.dismissed += 1;
                    5
                }
            };
            status_counts[status_slot] += 1;
            failure_bars.extend(p.bars_to_failure());

            for e in p.zone_entries() {
                slot.zone_entries += 1;
                entry_counts.0 += 1;
                match e.outcome {
                    ZoneOutcome::Success => {
                        slot.successful_zone_entries += 1;
                        entry_counts.1 += 1;
                    }
                    ZoneOutcome::Invalid => {
                        slot.invalid_zone_entries += 1;
                        entry_counts.2 += 1;
                    }
                    ZoneOutcome::Open => {}
                }
            }
        }
        let [pending, in_zone, success, invalid_prz, failed_prz, dismissed] = status_counts;
        let (zone_entries, successful_zone_entries, invalid_zone_entries) = entry_counts;

        Self {
            bars_processed,
            detections_run,
            trades: trades.len(),
            wins,
            losses,
            win_rate: rate(wins, trades.len()),
            total_pnl,
            final_equity,
            total_return_pct: if initial_capital > 0.0 { total_pnl / initial_capital * 100.0 } else { 0.0 },
            max_drawdown_pct: max_drawdown_pct(initial_capital, equity_curve),
            profit_factor: (gross_loss > 0.0).then(|| gross_profit / gross_loss),
            avg_trade_return_pct: (!trades.is_empty())
                .then(|| trades.iter().map(|t| t.return_pct).sum::<f64>() / trades.len() as f64),
            patterns_tracked: tracker.len(),
            pending,
            in_zone,
            success,
            invalid_prz,
            failed_prz,
            dismissed,
            pattern_success_rate: rate(success, success + invalid_prz + failed_prz),
            avg_bars_to_failure: (!failure_bars.is_empty())
                .then(|| failure_bars.iter().sum::<usize>() as f64 / failure_bars.len() as f64),
            zone_entries,
            successful_zone_entries,
            invalid_zone_entries,
            zone_success_rate: rate(successful_zone_entries, successful_zone_entries + invalid_zone_entries),
            by_pattern,
            warnings: tracker.warnings().to_vec(),
        }
    }
}

/// Largest peak-to-trough equity decline, in percent of the peak
fn max_drawdown_pct(initial_capital: f64, curve: &[EquitySample]) -> f64 {
    let mut peak = initial_capital;
    let mut max_dd = 0.0_f64;
    for sample in curve {
        peak = peak.max(sample.equity);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - sample.equity) / peak * 100.0);
        }
    }
    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::trades::{ExitReason, Side};
    use crate::tracker::TrackedId;

    fn trade(pnl: f64) -> TradeResult {
        TradeResult {
            pattern: TrackedId(0),
            name: "Bat",
            side: Side::Long,
            entry_bar: 1,
            entry_price: 100.0,
            exit_bar: 2,
            exit_price: 100.0 + pnl,
            quantity: 1.0,
            pnl,
            return_pct: pnl,
            exit_reason: ExitReason::EndOfData,
        }
    }

    fn sample(bar_index: usize, equity: f64) -> EquitySample {
        EquitySample { bar_index, equity, open_trades: 0 }
    }

    #[test]
    fn test_trade_metrics() {
        let trades = [trade(30.0), trade(-10.0), trade(20.0)];
        let curve = [sample(1, 1030.0), sample(2, 1020.0), sample(3, 1040.0)];
        let stats = BacktestStatistics::compute(3, 3, 1000.0, &trades, &curve, &PatternTracker::default());
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert!((stats.win_rate.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((stats.profit_factor.unwrap() - 5.0).abs() < 1e-12);
        assert!((stats.final_equity - 1040.0).abs() < 1e-9);
        assert!((stats.max_drawdown_pct - 10.0 / 1030.0 * 100.0).abs() < 1e-9);
        assert_eq!(stats.by_pattern["Bat"].trades, 3);
    }

    #[test]
    fn test_undefined_rates_are_none() {
        let stats = BacktestStatistics::compute(5, 5, 1000.0, &[], &[], &PatternTracker::default());
        assert_eq!(stats.win_rate, None);
        assert_eq!(stats.profit_factor, None);
        assert_eq!(stats.zone_success_rate, None);
        assert_eq!(stats.pattern_success_rate, None);
        assert_eq!(stats.max_drawdown_pct, 0.0);
    }
}
