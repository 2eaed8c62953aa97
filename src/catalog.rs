//! Harmonic ratio catalog
//!
//! Every definition applies to both orientations. Ratios are percentages of
//! the reference leg: AB/XA, BC/AB, CD/BC and AD/XA.

use serde::Serialize;

use crate::record::PatternKind;
use crate::{HarmonicError, Result};

/// Closed interval of leg ratios, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatioRange {
    pub min: f64,
    pub max: f64,
}

impl RatioRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, pct: f64) -> bool {
        self.min <= pct && pct <= self.max
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    /// 1.0 at the midpoint, 0.0 at either edge or beyond
    pub fn closeness(&self, pct: f64) -> f64 {
        let half = (self.max - self.min) / 2.0;
        if half <= f64::EPSILON {
            return if self.contains(pct) { 1.0 } else { 0.0 };
        }
        (1.0 - (pct - self.midpoint()).abs() / half).clamp(0.0, 1.0)
    }
}

/// A named harmonic pattern
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternDefinition {
    pub name: &'static str,
    pub kind: PatternKind,
    /// XABCD only
    pub ab_xa: Option<RatioRange>,
    pub bc_ab: RatioRange,
    /// One window per zone instance; ascending and disjoint
    pub cd_bc: &'static [RatioRange],
    /// XABCD only
    pub ad_xa: Option<RatioRange>,
    /// Ideal AD/XA completion, projected as an extra d-line when inside the window
    pub ad_target: Option<f64>,
}

impl PatternDefinition {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(HarmonicError::InvalidConfig(format!("{}: {msg}", self.name)));

        let xabcd_legs = self.ab_xa.is_some() && self.ad_xa.is_some();
        match self.kind {
            PatternKind::Xabcd if !xabcd_legs => return bad("XABCD needs AB/XA and AD/XA"),
            PatternKind::Abcd if self.ab_xa.is_some() || self.ad_xa.is_some() => {
                return bad("ABCD cannot constrain the XA leg")
            }
            _ => {}
        }
        if self.cd_bc.is_empty() {
            return bad("no CD/BC window");
        }

        let windows = self
            .ab_xa
            .iter()
            .chain(self.ad_xa.iter())
            .chain(std::iter::once(&self.bc_ab))
            .chain(self.cd_bc.iter());
        for w in windows {
            if !(w.min.is_finite() && w.max.is_finite()) || w.min <= 0.0 || w.min > w.max {
                return bad("ratio window must satisfy 0 < min <= max");
            }
        }
        if self.cd_bc.windows(2).any(|pair| pair[0].max >= pair[1].min) {
            return bad("CD/BC windows must be ascending and disjoint");
        }
        Ok(())
    }
}

// ============================================================
// BUILTIN DEFINITIONS
// ============================================================

const BC_STANDARD: RatioRange = RatioRange::new(38.2, 88.6);

pub const GARTLEY: PatternDefinition = PatternDefinition {
    name: "Gartley",
    kind: PatternKind::Xabcd,
    ab_xa: Some(RatioRange::new(56.0, 68.0)),
    bc_ab: BC_STANDARD,
    cd_bc: &[RatioRange::new(113.0, 161.8)],
    ad_xa: Some(RatioRange::new(75.0, 82.0)),
    ad_target: Some(78.6),
};

pub const BAT: PatternDefinition = PatternDefinition {
    name: "Bat",
    kind: PatternKind::Xabcd,
    ab_xa: Some(RatioRange::new(38.2, 50.0)),
    bc_ab: BC_STANDARD,
    cd_bc: &[RatioRange::new(161.8, 261.8)],
    ad_xa: Some(RatioRange::new(85.0, 91.0)),
    ad_target: Some(88.6),
};

pub const ALT_BAT: PatternDefinition = PatternDefinition {
    name: "Alternate Bat",
    kind: PatternKind::Xabcd,
    ab_xa: Some(RatioRange::new(30.0, 38.2)),
    bc_ab: BC_STANDARD,
    cd_bc: &[RatioRange::new(200.0, 361.8)],
    ad_xa: Some(RatioRange::new(110.0, 116.0)),
    ad_target: Some(113.0),
};

pub const BUTTERFLY: PatternDefinition = PatternDefinition {
    name: "Butterfly",
    kind: PatternKind::Xabcd,
    ab_xa: Some(RatioRange::new(75.0, 82.0)),
    bc_ab: BC_STANDARD,
    cd_bc: &[RatioRange::new(161.8, 261.8)],
    ad_xa: Some(RatioRange::new(124.0, 161.8)),
    ad_target: Some(127.0),
};

pub const CRAB: PatternDefinition = PatternDefinition {
    name: "Crab",
    kind: PatternKind::Xabcd,
    ab_xa: Some(RatioRange::new(38.2, 61.8)),
    bc_ab: BC_STANDARD,
    cd_bc: &[RatioRange::new(224.0, 361.8)],
    ad_xa: Some(RatioRange::new(155.0, 165.0)),
    ad_target: Some(161.8),
};

pub const DEEP_CRAB: PatternDefinition = PatternDefinition {
    name: "Deep Crab",
    kind: PatternKind::Xabcd,
    ab_xa: Some(RatioRange::new(85.0, 91.0)),
    bc_ab: BC_STANDARD,
    cd_bc: &[RatioRange::new(200.0, 361.8)],
    ad_xa: Some(RatioRange::new(155.0, 165.0)),
    ad_target: Some(161.8),
};

pub const ABCD: PatternDefinition = PatternDefinition {
    name: "ABCD",
    kind: PatternKind::Abcd,
    ab_xa: None,
    bc_ab: BC_STANDARD,
    cd_bc: &[RatioRange::new(127.0, 161.8)],
    ad_xa: None,
    ad_target: None,
};

/// ABCD with separate 127.2%, 161.8% and 261.8% extension zones
pub const ABCD_EXTENSION: PatternDefinition = PatternDefinition {
    name: "ABCD Extension",
    kind: PatternKind::Abcd,
    ab_xa: None,
    bc_ab: BC_STANDARD,
    cd_bc: &[
        RatioRange::new(124.0, 130.0),
        RatioRange::new(158.0, 165.0),
        RatioRange::new(255.0, 268.0),
    ],
    ad_xa: None,
    ad_target: None,
};

// ============================================================
// CATALOG
// ============================================================

/// Immutable set of pattern definitions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Catalog {
    definitions: Vec<PatternDefinition>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::harmonic()
    }
}

impl Catalog {
    /// Validate and wrap a custom set. Names must be unique.
    pub fn new(definitions: Vec<PatternDefinition>) -> Result<Self> {
        for (i, def) in definitions.iter().enumerate() {
            def.validate()?;
            if definitions[..i].iter().any(|d| d.name == def.name) {
                return Err(HarmonicError::InvalidConfig(format!(
                    "duplicate pattern name {}",
                    def.name
                )));
            }
        }
        Ok(Self { definitions })
    }

    /// All builtin XABCD and ABCD definitions
    pub fn harmonic() -> Self {
        Self {
            definitions: vec![
                GARTLEY,
                BAT,
                ALT_BAT,
                BUTTERFLY,
                CRAB,
                DEEP_CRAB,
                ABCD,
                ABCD_EXTENSION,
            ],
        }
    }

    pub fn xabcd_only() -> Self {
        Self {
            definitions: vec![GARTLEY, BAT, ALT_BAT, BUTTERFLY, CRAB, DEEP_CRAB],
        }
    }

    pub fn abcd_only() -> Self {
        Self {
            definitions: vec![ABCD, ABCD_EXTENSION],
        }
    }

    pub fn definitions(&self) -> &[PatternDefinition] {
        &self.definitions
    }

    pub fn of_kind(&self, kind: PatternKind) -> impl Iterator<Item = &PatternDefinition> {
        self.definitions.iter().filter(move |d| d.kind == kind)
    }

    pub fn get(&self, name: &str) -> Option<&PatternDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
