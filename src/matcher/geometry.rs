//! Leg arithmetic, projection and survivor validation
//!
//! Shared by the fast matcher, the reference matcher and the tracker's C
//! revision so that every path measures a structure with the same floating
//! point operations.

use super::MatchOptions;
use crate::catalog::{PatternDefinition, RatioRange};
use crate::extremum::ExtremumPoint;
use crate::record::{
    LegRatios, Orientation, PatternKind, PatternPoint, PatternRecord, PriceZone, Projection,
};
use crate::OHLCV;

/// Relative widening applied to precomputed D intervals before probing.
/// Survivors are re-measured exactly, so this only guards against rounding.
const MEMBERSHIP_EPS: f64 = 1e-9;

/// Points fixed before D
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Skeleton {
    pub x: Option<PatternPoint>,
    pub a: PatternPoint,
    pub b: PatternPoint,
    pub c: PatternPoint,
}

#[inline]
pub(crate) fn point(e: &ExtremumPoint) -> PatternPoint {
    PatternPoint::new(e.bar_index, e.price)
}

// ============================================================
// LEGS & RATIOS
// ============================================================

/// Length of a leg moving up (or down), `None` when it moves the other way or not at all
#[inline]
fn leg(from: f64, to: f64, up: bool) -> Option<f64> {
    let len = if up { to - from } else { from - to };
    (len > 0.0).then_some(len)
}

#[inline]
fn pct(part: f64, whole: f64) -> f64 {
    part / whole * 100.0
}

/// Price reached when a leg of `length` from `anchor` extends by `ratio` percent toward D
#[inline]
fn project_price(anchor: f64, length: f64, ratio: f64, orientation: Orientation) -> f64 {
    anchor - orientation.sign() * length * ratio / 100.0
}

fn ratio_interval(anchor: f64, length: f64, range: &RatioRange, orientation: Orientation) -> PriceZone {
    PriceZone::new(
        project_price(anchor, length, range.min, orientation),
        project_price(anchor, length, range.max, orientation),
    )
}

fn xa_len(o: Orientation, x: PatternPoint, a: PatternPoint) -> Option<f64> {
    leg(x.price, a.price, o.is_bullish())
}

fn ab_len(o: Orientation, a: PatternPoint, b: PatternPoint) -> Option<f64> {
    leg(a.price, b.price, !o.is_bullish())
}

fn bc_len(o: Orientation, b: PatternPoint, c: PatternPoint) -> Option<f64> {
    leg(b.price, c.price, o.is_bullish())
}

pub(crate) fn ab_xa(o: Orientation, x: PatternPoint, a: PatternPoint, b: PatternPoint) -> Option<f64> {
    Some(pct(ab_len(o, a, b)?, xa_len(o, x, a)?))
}

pub(crate) fn bc_ab(o: Orientation, a: PatternPoint, b: PatternPoint, c: PatternPoint) -> Option<f64> {
    Some(pct(bc_len(o, b, c)?, ab_len(o, a, b)?))
}

fn cd_bc(o: Orientation, b: PatternPoint, c: PatternPoint, d: PatternPoint) -> Option<f64> {
    Some(pct(leg(c.price, d.price, !o.is_bullish())?, bc_len(o, b, c)?))
}

fn ad_xa(o: Orientation, x: PatternPoint, a: PatternPoint, d: PatternPoint) -> Option<f64> {
    Some(pct(leg(a.price, d.price, !o.is_bullish())?, xa_len(o, x, a)?))
}

/// Index of the CD/BC window holding `ratio`
fn cd_window(def: &PatternDefinition, ratio: f64) -> Option<usize> {
    def.cd_bc.iter().position(|w| w.contains(ratio))
}

/// Zone instances a definition projects: one per CD/BC window for ABCD, one for XABCD
pub(crate) fn zone_instances(def: &PatternDefinition) -> std::ops::Range<usize> {
    match def.kind {
        PatternKind::Abcd => 0..def.cd_bc.len(),
        PatternKind::Xabcd => 0..1,
    }
}

// ============================================================
// D INTERVALS
// ============================================================

fn widen(zone: PriceZone, scale: f64) -> PriceZone {
    let eps = MEMBERSHIP_EPS * scale.abs().max(1.0);
    PriceZone {
        low: zone.low - eps,
        high: zone.high + eps,
    }
}

/// Slightly widened price intervals that any valid D must fall in.
///
/// XABCD intervals are the intersection of the CD/BC band around C with the
/// AD/XA band around A; an empty result means no D can complete the structure.
pub(crate) fn d_intervals(def: &PatternDefinition, o: Orientation, sk: &Skeleton) -> Vec<PriceZone> {
    let Some(bc) = bc_len(o, sk.b, sk.c) else {
        return Vec::new();
    };
    let scale = sk.a.price.abs().max(sk.c.price.abs());
    let cd_zones = def
        .cd_bc
        .iter()
        .map(|w| widen(ratio_interval(sk.c.price, bc, w, o), scale));

    match (def.kind, sk.x, def.ad_xa) {
        (PatternKind::Abcd, _, _) => cd_zones.collect(),
        (PatternKind::Xabcd, Some(x), Some(ad_window)) => {
            let Some(xa) = xa_len(o, x, sk.a) else {
                return Vec::new();
            };
            let ad_zone = widen(ratio_interval(sk.a.price, xa, &ad_window, o), scale);
            cd_zones.filter_map(|z| z.intersect(&ad_zone)).collect()
        }
        _ => Vec::new(),
    }
}

/// Discrete XABCD d-lines: corners of the AD/XA x CD/BC rectangle that satisfy
/// both windows, plus the ideal AD/XA completion when it does.
pub(crate) fn d_lines(def: &PatternDefinition, o: Orientation, sk: &Skeleton) -> Option<Vec<f64>> {
    let x = sk.x?;
    let ad_window = def.ad_xa?;
    let xa = xa_len(o, x, sk.a)?;
    let bc = bc_len(o, sk.b, sk.c)?;
    let ad_zone = ratio_interval(sk.a.price, xa, &ad_window, o);

    let mut levels = Vec::new();
    for window in def.cd_bc {
        let cd_zone = ratio_interval(sk.c.price, bc, window, o);
        let Some(both) = ad_zone.intersect(&cd_zone) else {
            continue;
        };
        let target = def.ad_target.map(|t| project_price(sk.a.price, xa, t, o));
        let candidates = [ad_zone.low, ad_zone.high, cd_zone.low, cd_zone.high]
            .into_iter()
            .chain(target);
        levels.extend(candidates.filter(|p| both.contains(*p)));
    }
    levels.sort_by(f64::total_cmp);
    levels.dedup_by(|a, b| (*a - *b).abs() <= MEMBERSHIP_EPS * a.abs().max(1.0));
    (!levels.is_empty()).then_some(levels)
}

// ============================================================
// PRICE ACTION CHECKS
// ============================================================

/// Whether a bar traded past `level` in the direction D is expected from
#[inline]
pub(crate) fn beyond<T: OHLCV>(o: Orientation, bar: &T, level: f64) -> bool {
    if o.is_bullish() {
        bar.low() < level
    } else {
        bar.high() > level
    }
}

/// Every bar strictly inside the leg stays within the leg's price range
fn leg_contained<T: OHLCV>(bars: &[T], from: PatternPoint, to: PatternPoint) -> bool {
    let (lo, hi) = (from.price.min(to.price), from.price.max(to.price));
    bars.get(from.bar_index + 1..to.bar_index)
        .is_some_and(|inner| inner.iter().all(|b| b.low() >= lo && b.high() <= hi))
}

fn legs(sk: &Skeleton, d: Option<PatternPoint>) -> impl Iterator<Item = (PatternPoint, PatternPoint)> {
    let head = sk.x.map(|x| (x, sk.a));
    let tail = d.map(|d| (sk.c, d));
    head.into_iter()
        .chain([(sk.a, sk.b), (sk.b, sk.c)])
        .chain(tail)
}

/// Project D for one zone instance, dropping anything already traded through
/// by `after_c` (the bars following C that have been observed).
pub(crate) fn project<T: OHLCV>(
    def: &PatternDefinition,
    o: Orientation,
    zone_instance: usize,
    sk: &Skeleton,
    after_c: &[T],
) -> Option<Projection> {
    match def.kind {
        PatternKind::Abcd => {
            let window = def.cd_bc.get(zone_instance)?;
            let bc = bc_len(o, sk.b, sk.c)?;
            let zone = ratio_interval(sk.c.price, bc, window, o);
            let far_edge = if o.is_bullish() { zone.low } else { zone.high };
            if after_c.iter().any(|bar| beyond(o, bar, far_edge)) {
                return None;
            }
            Some(Projection::Zone(zone))
        }
        PatternKind::Xabcd => {
            let mut levels = d_lines(def, o, sk)?;
            levels.retain(|&level| !after_c.iter().any(|bar| beyond(o, bar, level)));
            (!levels.is_empty()).then_some(Projection::Levels(levels))
        }
    }
}

/// Mean closeness of each measured ratio to the centre of its window
fn score(def: &PatternDefinition, ratios: &LegRatios, zone_instance: usize) -> f64 {
    let mut parts = Vec::with_capacity(4);
    if let (Some(r), Some(w)) = (ratios.ab_xa, def.ab_xa) {
        parts.push(w.closeness(r));
    }
    parts.push(def.bc_ab.closeness(ratios.bc_ab));
    if let Some(r) = ratios.cd_bc {
        if let Some(w) = cd_window(def, r).or(Some(zone_instance)).and_then(|i| def.cd_bc.get(i)) {
            parts.push(w.closeness(r));
        }
    }
    if let (Some(r), Some(w)) = (ratios.ad_xa, def.ad_xa) {
        parts.push(w.closeness(r));
    }
    parts.iter().sum::<f64>() / parts.len() as f64
}

/// Ratios of the fixed legs, checked against their windows
fn measure_skeleton(def: &PatternDefinition, o: Orientation, sk: &Skeleton) -> Option<LegRatios> {
    let ab_xa = match (def.kind, sk.x) {
        (PatternKind::Xabcd, Some(x)) => {
            let r = ab_xa(o, x, sk.a, sk.b)?;
            if !def.ab_xa.is_some_and(|w| w.contains(r)) {
                return None;
            }
            Some(r)
        }
        (PatternKind::Abcd, None) => None,
        _ => return None,
    };
    let bc = bc_ab(o, sk.a, sk.b, sk.c)?;
    def.bc_ab.contains(bc).then_some(LegRatios {
        ab_xa,
        bc_ab: bc,
        cd_bc: None,
        ad_xa: None,
    })
}

fn spans_allowed(opts: &MatchOptions, sk: &Skeleton, d: Option<PatternPoint>) -> bool {
    legs(sk, d).all(|(from, to)| from.bar_index < to.bar_index && opts.max_leg_span.allows(from.bar_index, to.bar_index))
}

fn build(
    def: &PatternDefinition,
    o: Orientation,
    sk: &Skeleton,
    d: Option<PatternPoint>,
    zone_instance: usize,
    projection: Projection,
    ratios: LegRatios,
) -> Option<PatternRecord> {
    let score = score(def, &ratios, zone_instance);
    match (projection, sk.x) {
        (Projection::Zone(zone), None) => Some(PatternRecord::abcd(
            def.name,
            o,
            [sk.a, sk.b, sk.c],
            d,
            zone_instance,
            zone,
            ratios,
            score,
        )),
        (Projection::Levels(levels), Some(x)) => Some(PatternRecord::xabcd(
            def.name,
            o,
            [x, sk.a, sk.b, sk.c],
            d,
            levels,
            ratios,
            score,
        )),
        _ => None,
    }
}

// ============================================================
// SURVIVOR VALIDATION
// ============================================================

/// Exact measurement and validation of a complete structure
pub(crate) fn finalize_formed<T: OHLCV>(
    def: &PatternDefinition,
    o: Orientation,
    sk: &Skeleton,
    d: PatternPoint,
    bars: &[T],
    opts: &MatchOptions,
) -> Option<PatternRecord> {
    if !spans_allowed(opts, sk, Some(d)) || d.bar_index >= bars.len() {
        return None;
    }
    let mut ratios = measure_skeleton(def, o, sk)?;

    let cd = cd_bc(o, sk.b, sk.c, d)?;
    let zone_instance = cd_window(def, cd)?;
    ratios.cd_bc = Some(cd);
    if let Some(x) = sk.x {
        let ad = ad_xa(o, x, sk.a, d)?;
        if !def.ad_xa.is_some_and(|w| w.contains(ad)) {
            return None;
        }
        ratios.ad_xa = Some(ad);
    }

    if opts.strict_price_containment && !legs(sk, Some(d)).all(|(f, t)| leg_contained(bars, f, t)) {
        return None;
    }
    if opts.validate_d_not_crossed && bars[d.bar_index + 1..].iter().any(|bar| beyond(o, bar, d.price)) {
        return None;
    }

    let projection = match def.kind {
        PatternKind::Abcd => project::<T>(def, o, zone_instance, sk, &[])?,
        PatternKind::Xabcd => Projection::Levels(d_lines(def, o, sk)?),
    };
    build(def, o, sk, Some(d), zone_instance, projection, ratios)
}

/// Exact measurement and validation of a structure still waiting for D
pub(crate) fn finalize_unformed<T: OHLCV>(
    def: &PatternDefinition,
    o: Orientation,
    zone_instance: usize,
    sk: &Skeleton,
    bars: &[T],
    opts: &MatchOptions,
) -> Option<PatternRecord> {
    let last = bars.len().checked_sub(1)?;
    if !spans_allowed(opts, sk, None) || sk.c.bar_index > last || !opts.max_leg_span.allows(sk.c.bar_index, last) {
        return None;
    }
    let ratios = measure_skeleton(def, o, sk)?;
    let after_c = &bars[sk.c.bar_index + 1..];

    if opts.strict_price_containment {
        let c_exceeded = after_c.iter().any(|bar| {
            if o.c_is_high() {
                bar.high() > sk.c.price
            } else {
                bar.low() < sk.c.price
            }
        });
        if c_exceeded || !legs(sk, None).all(|(f, t)| leg_contained(bars, f, t)) {
            return None;
        }
    }

    let projection = project(def, o, zone_instance, sk, after_c)?;
    build(def, o, sk, None, zone_instance, projection, ratios)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ABCD, GARTLEY};

    fn pt(i: usize, p: f64) -> PatternPoint {
        PatternPoint::new(i, p)
    }

    #[test]
    fn test_abcd_zone_projection() {
        let sk = Skeleton { x: None, a: pt(1, 100.0), b: pt(3, 80.0), c: pt(5, 92.0) };
        let empty: Vec<crate::Bar> = Vec::new();
        let Some(Projection::Zone(zone)) = project(&ABCD, Orientation::Bullish, 0, &sk, &empty) else {
            panic!("expected zone");
        };
        assert!((zone.low - 72.584).abs() < 1e-9);
        assert!((zone.high - 76.76).abs() < 1e-9);
    }

    #[test]
    fn test_bearish_mirror() {
        let sk = Skeleton { x: None, a: pt(1, 80.0), b: pt(3, 100.0), c: pt(5, 88.0) };
        let empty: Vec<crate::Bar> = Vec::new();
        let Some(Projection::Zone(zone)) = project(&ABCD, Orientation::Bearish, 0, &sk, &empty) else {
            panic!("expected zone");
        };
        assert!((zone.low - 103.24).abs() < 1e-9);
        assert!((zone.high - 107.416).abs() < 1e-9);
    }

    #[test]
    fn test_gartley_d_lines() {
        let sk = Skeleton {
            x: Some(pt(0, 0.0)),
            a: pt(2, 100.0),
            b: pt(4, 38.2),
            c: pt(6, 75.28),
        };
        let levels = d_lines(&GARTLEY, Orientation::Bullish, &sk).unwrap();
        assert_eq!(levels.len(), 3);
        assert!((levels[0] - 18.0).abs() < 1e-9);
        assert!((levels[1] - 21.4).abs() < 1e-9);
        assert!((levels[2] - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_direction_legs_rejected() {
        let a = pt(1, 100.0);
        let b = pt(3, 110.0);
        let c = pt(5, 105.0);
        assert!(bc_ab(Orientation::Bullish, a, b, c).is_none());
        assert!(bc_ab(Orientation::Bearish, a, b, c).is_some());
    }

    #[test]
    fn test_d_intervals_empty_when_windows_disjoint() {
        // CD/BC band around C is [30.9, 36.7], above the AD/XA band [18, 25]
        let sk = Skeleton {
            x: Some(pt(0, 0.0)),
            a: pt(2, 100.0),
            b: pt(4, 38.2),
            c: pt(6, 50.0),
        };
        assert!(d_intervals(&GARTLEY, Orientation::Bullish, &sk).is_empty());
    }
}
