//! Prefix-sharing search
//!
//! 1. XAB pass: every (X, A, B) whose AB/XA fits some definition, grouped by (A, B).
//! 2. XABC pass: extend each group with C, keep partials whose D interval is
//!    non-empty, grouped by C.
//! 3. D scan: each later D of the right polarity is tested against the
//!    precomputed intervals; hits are re-measured exactly.
//!
//! ABCD definitions skip the first pass. The XAB pass is O(n³). The later
//! passes are output-sensitive: the XABC pass costs one step per (surviving
//! XAB triple, C) pair and the D scan one per (partial, D) pair. In the worst
//! case, when nearly every triple fits its AB/XA window, that is O(n⁴).

use std::collections::BTreeMap;

use super::geometry::{self, point, Skeleton};
use super::{MatchOptions, MatchResult};
use crate::catalog::{Catalog, PatternDefinition};
use crate::extremum::ExtremumPoint;
use crate::record::{Orientation, PatternKind, PriceZone};
use crate::OHLCV;

/// A structure through C together with the price intervals D may complete it in
struct Partial<'d> {
    def: &'d PatternDefinition,
    skeleton: Skeleton,
    intervals: Vec<PriceZone>,
}

type PartialsByC<'d> = BTreeMap<usize, Vec<Partial<'d>>>;

pub(super) fn search<T: OHLCV>(
    extremums: &[ExtremumPoint],
    bars: &[T],
    catalog: &Catalog,
    opts: &MatchOptions,
) -> MatchResult {
    let mut out = MatchResult::default();
    let xabcd: Vec<&PatternDefinition> = catalog.of_kind(PatternKind::Xabcd).collect();
    let abcd: Vec<&PatternDefinition> = catalog.of_kind(PatternKind::Abcd).collect();

    for orientation in Orientation::BOTH {
        if !xabcd.is_empty() && extremums.len() >= PatternKind::Xabcd.min_extremums() {
            let partials = xabc_partials(extremums, &xabcd, orientation, opts);
            scan_d(extremums, bars, orientation, opts, &partials, &mut out);
        }
        if !abcd.is_empty() && extremums.len() >= PatternKind::Abcd.min_extremums() {
            let partials = abc_partials(extremums, &abcd, orientation, opts);
            scan_d(extremums, bars, orientation, opts, &partials, &mut out);
        }
    }
    out
}

/// Next extremums after `from` with the given polarity, strictly later in bars
/// and within the leg span limit
fn successors<'e>(
    ext: &'e [ExtremumPoint],
    from: usize,
    is_high: bool,
    opts: &MatchOptions,
) -> impl Iterator<Item = (usize, &'e ExtremumPoint)> + 'e {
    let origin = ext[from].bar_index;
    let span = opts.max_leg_span;
    ext.iter()
        .enumerate()
        .skip(from + 1)
        .filter(move |(_, e)| e.is_high == is_high && e.bar_index > origin && span.allows(origin, e.bar_index))
}

fn xabc_partials<'d>(
    ext: &[ExtremumPoint],
    defs: &[&'d PatternDefinition],
    o: Orientation,
    opts: &MatchOptions,
) -> PartialsByC<'d> {
    let a_high = o.c_is_high();

    // (A, B) -> [(X, definition)]
    let mut xab: BTreeMap<(usize, usize), Vec<(usize, usize)>> = BTreeMap::new();
    for (xi, x) in ext.iter().enumerate() {
        if x.is_high == a_high {
            continue;
        }
        for (ai, a) in successors(ext, xi, a_high, opts) {
            for (bi, b) in successors(ext, ai, !a_high, opts) {
                let Some(ratio) = geometry::ab_xa(o, point(x), point(a), point(b)) else {
                    continue;
                };
                for (di, def) in defs.iter().enumerate() {
                    if def.ab_xa.is_some_and(|w| w.contains(ratio)) {
                        xab.entry((ai, bi)).or_default().push((xi, di));
                    }
                }
            }
        }
    }

    let mut by_c = PartialsByC::new();
    for (&(ai, bi), heads) in &xab {
        let (a, b) = (point(&ext[ai]), point(&ext[bi]));
        for (ci, c) in successors(ext, bi, a_high, opts) {
            let c = point(c);
            let Some(ratio) = geometry::bc_ab(o, a, b, c) else {
                continue;
            };
            for &(xi, di) in heads {
                let def = defs[di];
                if !def.bc_ab.contains(ratio) {
                    continue;
                }
                let skeleton = Skeleton { x: Some(point(&ext[xi])), a, b, c };
                let intervals = geometry::d_intervals(def, o, &skeleton);
                if !intervals.is_empty() {
                    by_c.entry(ci).or_default().push(Partial { def, skeleton, intervals });
                }
            }
        }
    }
    by_c
}

fn abc_partials<'d>(
    ext: &[ExtremumPoint],
    defs: &[&'d PatternDefinition],
    o: Orientation,
    opts: &MatchOptions,
) -> PartialsByC<'d> {
    let a_high = o.c_is_high();
    let mut by_c = PartialsByC::new();
    for (ai, a) in ext.iter().enumerate() {
        if a.is_high != a_high {
            continue;
        }
        for (bi, b) in successors(ext, ai, !a_high, opts) {
            for (ci, c) in successors(ext, bi, a_high, opts) {
                let (a, b, c) = (point(a), point(b), point(c));
                let Some(ratio) = geometry::bc_ab(o, a, b, c) else {
                    continue;
                };
                for &def in defs {
                    if def.bc_ab.contains(ratio) {
                        let skeleton = Skeleton { x: None, a, b, c };
                        let intervals = geometry::d_intervals(def, o, &skeleton);
                        by_c.entry(ci).or_default().push(Partial { def, skeleton, intervals });
                    }
                }
            }
        }
    }
    by_c
}

/// Complete every partial with each later D, then emit its unformed projections
fn scan_d<T: OHLCV>(
    ext: &[ExtremumPoint],
    bars: &[T],
    o: Orientation,
    opts: &MatchOptions,
    by_c: &PartialsByC<'_>,
    out: &mut MatchResult,
) {
    let d_high = !o.c_is_high();
    for (&ci, partials) in by_c {
        let c_bar = ext[ci].bar_index;
        let candidates = ext[ci + 1..]
            .iter()
            .filter(|e| e.is_high == d_high && e.bar_index > c_bar);
        for d in candidates {
            for partial in partials {
                if !partial.intervals.iter().any(|z| z.contains(d.price)) {
                    continue;
                }
                if let Some(record) =
                    geometry::finalize_formed(partial.def, o, &partial.skeleton, point(d), bars, opts)
                {
                    out.formed.push(record);
                }
            }
        }

        for partial in partials {
            for zone_instance in geometry::zone_instances(partial.def) {
                if let Some(record) =
                    geometry::finalize_unformed(partial.def, o, zone_instance, &partial.skeleton, bars, opts)
                {
                    out.unformed.push(record);
                }
            }
        }
    }
}
