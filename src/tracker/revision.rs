//! C-point revision for pending patterns
//!
//! While a pattern waits for price to reach its zone, a new swing beyond C
//! moves C forward. The projection is then rebuilt from scratch; it is never
//! patched level by level.

use super::TrackedPattern;
use crate::catalog::PatternDefinition;
use crate::extremum::ExtremumPoint;
use crate::matcher::geometry::{self, point, Skeleton};
use crate::record::TrackingKey;
use crate::OHLCV;

/// BC/AB band, in percent, a revised C must keep
const REVISION_BC_AB: (f64, f64) = (10.0, 500.0);

pub(super) enum Revision {
    Unchanged,
    Revised,
    /// C moved but every projected level was already traded through
    Exhausted,
}

/// Try to move C to the most extreme qualifying swing before `bar_index`.
///
/// `history` is every bar before the current one. A C that would give the
/// pattern a key `taken` by another tracked pattern is not adopted.
pub(super) fn revise<T: OHLCV>(
    pattern: &mut TrackedPattern,
    def: Option<&PatternDefinition>,
    extremums: &[ExtremumPoint],
    history: &[T],
    bar_index: usize,
    taken: impl Fn(&TrackingKey) -> bool,
) -> Revision {
    let Some(def) = def else {
        return Revision::Unchanged;
    };
    let orientation = pattern.orientation();
    let c_high = orientation.c_is_high();
    let current = pattern.c;

    let more_extreme = |e: &&ExtremumPoint| {
        if c_high {
            e.price > current.price
        } else {
            e.price < current.price
        }
    };
    // earliest wins on equal prices
    let candidate = extremums
        .iter()
        .filter(|e| e.is_high == c_high && e.bar_index > current.bar_index && e.bar_index < bar_index)
        .filter(more_extreme)
        .fold(None::<&ExtremumPoint>, |best, e| match best {
            Some(b) if (c_high && e.price <= b.price) || (!c_high && e.price >= b.price) => Some(b),
            _ => Some(e),
        });
    let Some(candidate) = candidate else {
        return Revision::Unchanged;
    };

    let (a, b) = (pattern.a(), pattern.b());
    let new_c = point(candidate);
    if new_c.bar_index <= b.bar_index {
        return Revision::Unchanged;
    }
    let Some(ratio) = geometry::bc_ab(orientation, a, b, new_c) else {
        return Revision::Unchanged;
    };
    if !(REVISION_BC_AB.0..=REVISION_BC_AB.1).contains(&ratio) {
        return Revision::Unchanged;
    }
    let mut key = pattern.key();
    key.identity.c_idx = new_c.bar_index;
    if taken(&key) {
        return Revision::Unchanged;
    }

    let skeleton = Skeleton { x: pattern.x(), a, b, c: new_c };
    let after_c = history.get(new_c.bar_index + 1..).unwrap_or(&[]);
    pattern.c = new_c;
    pattern.revisions += 1;
    match geometry::project(def, orientation, pattern.record.zone_instance(), &skeleton, after_c) {
        Some(projection) => {
            pattern.projection = projection;
            Revision::Revised
        }
        None => Revision::Exhausted,
    }
}
