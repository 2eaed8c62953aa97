//! Exhaustive search used as a correctness oracle for the fast matcher

use super::geometry::{self, point, Skeleton};
use super::{MatchOptions, MatchResult};
use crate::catalog::Catalog;
use crate::extremum::ExtremumPoint;
use crate::record::{Orientation, PatternKind};
use crate::OHLCV;

/// Test every combination of alternating extremums against every definition.
///
/// O(n⁵) for XABCD; only suitable for short series and tests. The result is
/// identical to [`match_patterns`](super::match_patterns).
pub fn match_brute_force<T: OHLCV>(
    extremums: &[ExtremumPoint],
    bars: &[T],
    catalog: &Catalog,
    options: &MatchOptions,
) -> MatchResult {
    let mut out = MatchResult::default();

    for o in Orientation::BOTH {
        for def in catalog.definitions() {
            let (head, x_first) = match def.kind {
                PatternKind::Xabcd => (4, true),
                PatternKind::Abcd => (3, false),
            };
            // X, B and D share polarity; A and C take the other
            let first_is_high = if x_first { !o.c_is_high() } else { o.c_is_high() };

            for_each_chain(extremums, first_is_high, head, &mut |chain| {
                let pts: Vec<_> = chain.iter().map(|&i| point(&extremums[i])).collect();
                let skeleton = match pts.as_slice() {
                    [x, a, b, c] => Skeleton { x: Some(*x), a: *a, b: *b, c: *c },
                    [a, b, c] => Skeleton { x: None, a: *a, b: *b, c: *c },
                    _ => return,
                };
                for zone_instance in geometry::zone_instances(def) {
                    if let Some(record) =
                        geometry::finalize_unformed(def, o, zone_instance, &skeleton, bars, options)
                    {
                        out.unformed.push(record);
                    }
                }
            });

            for_each_chain(extremums, first_is_high, head + 1, &mut |chain| {
                let pts: Vec<_> = chain.iter().map(|&i| point(&extremums[i])).collect();
                let (skeleton, d) = match pts.as_slice() {
                    [x, a, b, c, d] => (Skeleton { x: Some(*x), a: *a, b: *b, c: *c }, *d),
                    [a, b, c, d] => (Skeleton { x: None, a: *a, b: *b, c: *c }, *d),
                    _ => return,
                };
                if let Some(record) = geometry::finalize_formed(def, o, &skeleton, d, bars, options) {
                    out.formed.push(record);
                }
            });
        }
    }

    out.sort();
    out
}

/// Visit every sequence of `len` extremum positions with strictly increasing
/// bar indices and alternating polarity, starting at `first_is_high`.
fn for_each_chain(
    ext: &[ExtremumPoint],
    first_is_high: bool,
    len: usize,
    visit: &mut dyn FnMut(&[usize]),
) {
    fn extend(
        ext: &[ExtremumPoint],
        chain: &mut Vec<usize>,
        want_high: bool,
        len: usize,
        visit: &mut dyn FnMut(&[usize]),
    ) {
        if chain.len() == len {
            visit(chain);
            return;
        }
        let (start, after_bar) = match chain.last() {
            Some(&last) => (last + 1, Some(ext[last].bar_index)),
            None => (0, None),
        };
        for (i, e) in ext.iter().enumerate().skip(start) {
            if e.is_high != want_high || after_bar.is_some_and(|bar| e.bar_index <= bar) {
                continue;
            }
            chain.push(i);
            extend(ext, chain, !want_high, len, visit);
            chain.pop();
        }
    }

    let mut chain = Vec::with_capacity(len);
    extend(ext, &mut chain, first_is_high, len, visit);
}
