//! Per-bar state machine
//!
//! Every check for a pattern reads the same bar snapshot, and the pattern's
//! status at the start of the bar decides which checks run. The only bar that
//! can produce two transitions is an entry bar that straddles the whole zone.

use super::{DismissalReason, PatternStatus, StatusTransition, TrackedPattern, ZoneEntry, ZoneOutcome};
use crate::record::{PatternPoint, Projection};
use crate::{OHLCVExt, OHLCV};

pub(super) fn advance<T: OHLCV>(
    pattern: &mut TrackedPattern,
    bar_index: usize,
    bar: &T,
    log: &mut Vec<StatusTransition>,
) {
    match pattern.status {
        PatternStatus::Pending => pending(pattern, bar_index, bar, log),
        PatternStatus::InZone => in_zone(pattern, bar_index, bar, log),
        PatternStatus::InvalidPrz => invalid(pattern, bar_index, bar, log),
        _ => {}
    }
}

/// Levels (or the zone, as `None`) the bar's range touches
fn touches<T: OHLCV>(projection: &Projection, bar: &T) -> Vec<Option<usize>> {
    match projection {
        Projection::Zone(zone) => {
            if bar.overlaps(zone.low, zone.high) {
                vec![None]
            } else {
                Vec::new()
            }
        }
        Projection::Levels(levels) => levels
            .iter()
            .enumerate()
            .filter(|&(_, &level)| bar.low() <= level && level <= bar.high())
            .map(|(i, _)| Some(i))
            .collect(),
    }
}

fn pending<T: OHLCV>(p: &mut TrackedPattern, bar_index: usize, bar: &T, log: &mut Vec<StatusTransition>) {
    let bullish = p.orientation().is_bullish();
    let bounds = p.bounds();
    let touched = touches(&p.projection, bar);

    if touched.is_empty() {
        let b = p.b().price;
        let beyond_b = if bullish { bar.close() < b } else { bar.close() > b };
        if beyond_b {
            p.dismissal = Some(DismissalReason::CloseBeyondB);
            p.set_status(PatternStatus::Dismissed, bar_index, log);
        }
        return;
    }

    // Price of each touch, and of the pattern's first entry
    let extreme = if bullish { bar.low() } else { bar.high() };
    let mut entries: Vec<ZoneEntry> = touched
        .iter()
        .map(|&level| ZoneEntry {
            bar_index,
            price: match level {
                Some(i) => p.projection.levels()[i],
                None => bounds.clamp(extreme),
            },
            level,
            outcome: ZoneOutcome::Open,
        })
        .collect();
    let first = if bullish {
        entries.iter().map(|e| e.price).fold(f64::NEG_INFINITY, f64::max)
    } else {
        entries.iter().map(|e| e.price).fold(f64::INFINITY, f64::min)
    };
    p.entry = Some(PatternPoint::new(bar_index, first));

    let straddles = bar.low() < bounds.low && bar.high() > bounds.high;
    p.set_status(PatternStatus::InZone, bar_index, log);
    if straddles {
        for e in &mut entries {
            e.outcome = ZoneOutcome::Invalid;
        }
        p.entries.extend(entries);
        violate(p, bar_index, log);
    } else {
        p.entries.extend(entries);
    }
}

fn in_zone<T: OHLCV>(p: &mut TrackedPattern, bar_index: usize, bar: &T, log: &mut Vec<StatusTransition>) {
    let bullish = p.orientation().is_bullish();
    let bounds = p.bounds();

    for level in touches(&p.projection, bar).into_iter().flatten() {
        if p.entries.iter().any(|e| e.level == Some(level)) {
            continue;
        }
        p.entries.push(ZoneEntry {
            bar_index,
            price: p.projection.levels()[level],
            level: Some(level),
            outcome: ZoneOutcome::Open,
        });
    }

    let broke_through = if bullish { bar.low() < bounds.low } else { bar.high() > bounds.high };
    if broke_through {
        p.resolve_entries(ZoneOutcome::Invalid);
        violate(p, bar_index, log);
        return;
    }

    let reversed = if bullish { bar.close() > bounds.high } else { bar.close() < bounds.low };
    if reversed {
        p.resolve_entries(ZoneOutcome::Success);
        p.reversal = Some(PatternPoint::new(bar_index, bar.close()));
        let far = if bullish { bounds.high } else { bounds.low };
        p.exit = Some(PatternPoint::new(bar_index, far));
        p.set_status(PatternStatus::Success, bar_index, log);
    }
}

fn violate(p: &mut TrackedPattern, bar_index: usize, log: &mut Vec<StatusTransition>) {
    let bounds = p.bounds();
    let edge = if p.orientation().is_bullish() { bounds.low } else { bounds.high };
    p.violation_bar = Some(bar_index);
    p.exit = Some(PatternPoint::new(bar_index, edge));
    p.set_status(PatternStatus::InvalidPrz, bar_index, log);
}

fn invalid<T: OHLCV>(p: &mut TrackedPattern, bar_index: usize, bar: &T, log: &mut Vec<StatusTransition>) {
    let bounds = p.bounds();
    let crossed_back = if p.orientation().is_bullish() {
        bar.close() > bounds.high
    } else {
        bar.close() < bounds.low
    };
    if crossed_back {
        p.bars_to_failure = p.violation_bar.map(|v| bar_index - v);
        p.set_status(PatternStatus::FailedPrz, bar_index, log);
    }
}
