//! Pattern records, projections and identities
//!
//! A [`PatternRecord`] is produced by the matcher and never reshaped: its
//! kind (ABCD or XABCD) and its projection shape (price interval or discrete
//! level set) are fixed by the constructor.

use serde::Serialize;

// ============================================================
// ORIENTATION & KIND
// ============================================================

/// Expected reversal direction at D
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Orientation {
    /// D is a swing low; price is expected to turn up
    Bullish,
    /// D is a swing high; price is expected to turn down
    Bearish,
}

impl Orientation {
    pub const BOTH: [Orientation; 2] = [Orientation::Bullish, Orientation::Bearish];

    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Orientation::Bullish)
    }

    /// Whether C (and A) are swing highs. D, B and X take the other polarity.
    #[inline]
    pub fn c_is_high(self) -> bool {
        self.is_bullish()
    }

    /// +1.0 when D lies below C, -1.0 when above
    #[inline]
    pub(crate) fn sign(self) -> f64 {
        if self.is_bullish() {
            1.0
        } else {
            -1.0
        }
    }
}

/// Number of structural points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PatternKind {
    Abcd,
    Xabcd,
}

impl PatternKind {
    /// Extremums needed before a structure of this kind can exist
    pub fn min_extremums(self) -> usize {
        match self {
            PatternKind::Abcd => 4,
            PatternKind::Xabcd => 5,
        }
    }
}

// ============================================================
// POINTS & ZONES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternPoint {
    pub bar_index: usize,
    pub price: f64,
}

impl PatternPoint {
    pub fn new(bar_index: usize, price: f64) -> Self {
        Self { bar_index, price }
    }
}

/// Closed price interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceZone {
    pub low: f64,
    pub high: f64,
}

impl PriceZone {
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    #[inline]
    pub fn contains(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }

    /// Overlap of two zones, `None` when disjoint
    pub fn intersect(&self, other: &PriceZone) -> Option<PriceZone> {
        let low = self.low.max(other.low);
        let high = self.high.min(other.high);
        (low <= high).then_some(PriceZone { low, high })
    }

    #[inline]
    pub fn clamp(&self, price: f64) -> f64 {
        price.clamp(self.low, self.high)
    }
}

/// Where D is expected
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Projection {
    /// ABCD potential reversal zone
    Zone(PriceZone),
    /// XABCD d-lines, ascending and deduplicated
    Levels(Vec<f64>),
}

impl Projection {
    /// Outer boundaries of the projection
    pub fn bounds(&self) -> PriceZone {
        match self {
            Projection::Zone(z) => *z,
            Projection::Levels(levels) => {
                let low = levels.iter().copied().fold(f64::INFINITY, f64::min);
                let high = levels.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                PriceZone { low, high }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Projection::Levels(levels) if levels.is_empty())
    }

    pub fn levels(&self) -> &[f64] {
        match self {
            Projection::Zone(_) => &[],
            Projection::Levels(levels) => levels,
        }
    }
}

// ============================================================
// RATIOS
// ============================================================

/// Measured leg ratios in percent; legs that do not exist yet are `None`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LegRatios {
    pub ab_xa: Option<f64>,
    pub bc_ab: f64,
    pub cd_bc: Option<f64>,
    pub ad_xa: Option<f64>,
}

// ============================================================
// IDENTITY
// ============================================================

/// Structural identity of a pattern, independent of D.
///
/// An unformed record and its later formed counterpart share this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PatternIdentity {
    pub kind: PatternKind,
    pub name: &'static str,
    pub orientation: Orientation,
    pub x_idx: Option<usize>,
    pub a_idx: usize,
    pub b_idx: usize,
    pub c_idx: usize,
}

/// Key of one tracked zone instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackingKey {
    pub identity: PatternIdentity,
    pub zone_instance: usize,
}

// ============================================================
// RECORD
// ============================================================

/// One matched pattern. D is `None` while unformed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternRecord {
    kind: PatternKind,
    name: &'static str,
    orientation: Orientation,
    x: Option<PatternPoint>,
    a: PatternPoint,
    b: PatternPoint,
    c: PatternPoint,
    d: Option<PatternPoint>,
    zone_instance: usize,
    projection: Projection,
    ratios: LegRatios,
    score: f64,
}

impl PatternRecord {
    /// ABCD record; `zone_instance` is the index of the CD/BC window the zone came from
    #[allow(clippy::too_many_arguments)]
    pub fn abcd(
        name: &'static str,
        orientation: Orientation,
        [a, b, c]: [PatternPoint; 3],
        d: Option<PatternPoint>,
        zone_instance: usize,
        zone: PriceZone,
        ratios: LegRatios,
        score: f64,
    ) -> Self {
        Self {
            kind: PatternKind::Abcd,
            name,
            orientation,
            x: None,
            a,
            b,
            c,
            d,
            zone_instance,
            projection: Projection::Zone(zone),
            ratios,
            score,
        }
    }

    /// XABCD record holding all its d-lines in one instance
    pub fn xabcd(
        name: &'static str,
        orientation: Orientation,
        [x, a, b, c]: [PatternPoint; 4],
        d: Option<PatternPoint>,
        levels: Vec<f64>,
        ratios: LegRatios,
        score: f64,
    ) -> Self {
        Self {
            kind: PatternKind::Xabcd,
            name,
            orientation,
            x: Some(x),
            a,
            b,
            c,
            d,
            zone_instance: 0,
            projection: Projection::Levels(levels),
            ratios,
            score,
        }
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn x(&self) -> Option<PatternPoint> {
        self.x
    }

    pub fn a(&self) -> PatternPoint {
        self.a
    }

    pub fn b(&self) -> PatternPoint {
        self.b
    }

    pub fn c(&self) -> PatternPoint {
        self.c
    }

    pub fn d(&self) -> Option<PatternPoint> {
        self.d
    }

    pub fn is_formed(&self) -> bool {
        self.d.is_some()
    }

    pub fn zone_instance(&self) -> usize {
        self.zone_instance
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn ratios(&self) -> &LegRatios {
        &self.ratios
    }

    /// Ratio fit in [0, 1]
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn identity(&self) -> PatternIdentity {
        PatternIdentity {
            kind: self.kind,
            name: self.name,
            orientation: self.orientation,
            x_idx: self.x.map(|p| p.bar_index),
            a_idx: self.a.bar_index,
            b_idx: self.b.bar_index,
            c_idx: self.c.bar_index,
        }
    }

    pub fn tracking_key(&self) -> TrackingKey {
        TrackingKey {
            identity: self.identity(),
            zone_instance: self.zone_instance,
        }
    }

    /// Canonical ordering used to make matcher output deterministic
    pub(crate) fn sort_key(&self) -> (TrackingKey, Option<usize>) {
        (self.tracking_key(), self.d.map(|p| p.bar_index))
    }
}
