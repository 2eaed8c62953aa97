//! Signals, open positions and closed trades

use serde::Serialize;

use crate::params::BacktestParams;
use crate::record::Orientation;
use crate::tracker::{PatternStatus, TrackedId, TrackedPattern};
use crate::OHLCV;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn from_orientation(orientation: Orientation) -> Self {
        if orientation.is_bullish() {
            Side::Long
        } else {
            Side::Short
        }
    }

    #[inline]
    fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    /// Pattern invalidated, failed or was dismissed while the trade was open
    Structural,
    EndOfData,
}

/// Limit order derived from a pending pattern
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeSignal {
    pub pattern: TrackedId,
    pub name: &'static str,
    pub side: Side,
    pub created_at: usize,
    pub score: f64,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
}

impl TradeSignal {
    /// Entry at the zone boundary price reaches first; stop and target at
    /// fixed fractions of the entry.
    pub fn from_pattern(pattern: &TrackedPattern, params: &BacktestParams, bar_index: usize) -> Option<Self> {
        let side = Side::from_orientation(pattern.orientation());
        let bounds = pattern.bounds();
        let entry = match side {
            Side::Long => bounds.high,
            Side::Short => bounds.low,
        };
        if !(entry.is_finite() && entry > 0.0) {
            return None;
        }
        let s = side.sign();
        Some(Self {
            pattern: pattern.id(),
            name: pattern.name(),
            side,
            created_at: bar_index,
            score: pattern.score(),
            entry,
            stop: entry * (1.0 - s * params.stop_loss_fraction),
            target: entry * (1.0 + s * params.take_profit_fraction),
        })
    }

    #[inline]
    pub fn triggers<T: OHLCV>(&self, bar: &T) -> bool {
        bar.low() <= self.entry && self.entry <= bar.high()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpenTrade {
    pub signal: TradeSignal,
    pub entry_bar: usize,
    pub quantity: f64,
}

impl OpenTrade {
    pub fn unrealized(&self, price: f64) -> f64 {
        self.signal.side.sign() * (price - self.signal.entry) * self.quantity
    }

    /// Stop first, then target, then a structural exit at the close
    pub(crate) fn exit_on<T: OHLCV>(&self, bar: &T, status: Option<PatternStatus>) -> Option<(ExitReason, f64)> {
        let s = &self.signal;
        let (stopped, reached) = match s.side {
            Side::Long => (bar.low() <= s.stop, bar.high() >= s.target),
            Side::Short => (bar.high() >= s.stop, bar.low() <= s.target),
        };
        if stopped {
            return Some((ExitReason::StopLoss, s.stop));
        }
        if reached {
            return Some((ExitReason::TakeProfit, s.target));
        }
        match status {
            Some(PatternStatus::InvalidPrz | PatternStatus::FailedPrz | PatternStatus::Dismissed) => {
                Some((ExitReason::Structural, bar.close()))
            }
            _ => None,
        }
    }

    pub(crate) fn close(self, exit_bar: usize, exit_price: f64, reason: ExitReason) -> TradeResult {
        let pnl = self.unrealized(exit_price);
        let notional = self.signal.entry * self.quantity;
        TradeResult {
            pattern: self.signal.pattern,
            name: self.signal.name,
            side: self.signal.side,
            entry_bar: self.entry_bar,
            entry_price: self.signal.entry,
            exit_bar,
            exit_price,
            quantity: self.quantity,
            pnl,
            return_pct: if notional > 0.0 { pnl / notional * 100.0 } else { 0.0 },
            exit_reason: reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeResult {
    pub pattern: TrackedId,
    pub name: &'static str,
    pub side: Side,
    pub entry_bar: usize,
    pub entry_price: f64,
    pub exit_bar: usize,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub return_pct: f64,
    pub exit_reason: ExitReason,
}

impl TradeResult {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;

    fn long_trade() -> OpenTrade {
        let signal = TradeSignal {
            pattern: TrackedId(0),
            name: "ABCD",
            side: Side::Long,
            created_at: 10,
            score: 0.5,
            entry: 100.0,
            stop: 98.0,
            target: 104.0,
        };
        OpenTrade { signal, entry_bar: 11, quantity: 10.0 }
    }

    #[test]
    fn test_stop_takes_priority() {
        let trade = long_trade();
        let bar = Bar::new(0, 100.0, 105.0, 97.0, 101.0, 1.0);
        assert_eq!(trade.exit_on(&bar, None), Some((ExitReason::StopLoss, 98.0)));
    }

    #[test]
    fn test_structural_exit_at_close() {
        let trade = long_trade();
        let bar = Bar::new(0, 100.0, 101.0, 99.0, 100.5, 1.0);
        assert_eq!(trade.exit_on(&bar, Some(PatternStatus::InZone)), None);
        assert_eq!(
            trade.exit_on(&bar, Some(PatternStatus::InvalidPrz)),
            Some((ExitReason::Structural, 100.5))
        );
    }

    #[test]
    fn test_close_pnl() {
        let result = long_trade().close(14, 104.0, ExitReason::TakeProfit);
        assert!((result.pnl - 40.0).abs() < 1e-9);
        assert!((result.return_pct - 4.0).abs() < 1e-9);
        assert!(result.is_win());
    }
}
