//! Harmonic pattern matching over an extremum list
//!
//! [`match_patterns`] is the production matcher: it shares partial structures
//! by prefix so the search costs O(n³) in the number of extremums rather than
//! the O(n⁵) of trying every five-point combination. [`match_brute_force`]
//! is that naive search, kept as an oracle; both produce identical results.

mod fast;
pub(crate) mod geometry;
mod reference;

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::catalog::Catalog;
use crate::extremum::ExtremumPoint;
use crate::record::PatternRecord;
use crate::OHLCV;

pub use reference::match_brute_force;

// ============================================================
// OPTIONS
// ============================================================

/// Upper limit on the bar distance between consecutive pattern points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LegSpan {
    #[default]
    Unbounded,
    Bounded(usize),
}

impl LegSpan {
    #[inline]
    pub fn allows(self, from_bar: usize, to_bar: usize) -> bool {
        match self {
            LegSpan::Unbounded => true,
            LegSpan::Bounded(max) => to_bar.saturating_sub(from_bar) <= max,
        }
    }
}

impl fmt::Display for LegSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegSpan::Unbounded => write!(f, "unbounded"),
            LegSpan::Bounded(max) => write!(f, "{max}"),
        }
    }
}

impl Serialize for LegSpan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LegSpan::Unbounded => serializer.serialize_str("unbounded"),
            LegSpan::Bounded(max) => serializer.serialize_u64(*max as u64),
        }
    }
}

impl<'de> Deserialize<'de> for LegSpan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpanVisitor;

        impl<'de> Visitor<'de> for SpanVisitor {
            type Value = LegSpan;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a bar count or \"unbounded\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<LegSpan, E> {
                usize::try_from(v)
                    .map(LegSpan::Bounded)
                    .map_err(|_| E::custom("leg span too large"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<LegSpan, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom("leg span must be non-negative"))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<LegSpan, E> {
                if v.eq_ignore_ascii_case("unbounded") {
                    Ok(LegSpan::Unbounded)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(SpanVisitor)
    }
}

/// Validation switches applied to every candidate structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Bars inside each leg must stay within the leg's price range, and for
    /// unformed patterns nothing after C may exceed C
    pub strict_price_containment: bool,
    pub max_leg_span: LegSpan,
    /// Discard formed patterns whose D has since been traded through
    pub validate_d_not_crossed: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            strict_price_containment: true,
            max_leg_span: LegSpan::Unbounded,
            validate_d_not_crossed: true,
        }
    }
}

// ============================================================
// RESULT
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    pub formed: Vec<PatternRecord>,
    pub unformed: Vec<PatternRecord>,
}

impl MatchResult {
    pub fn len(&self) -> usize {
        self.formed.len() + self.unformed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formed.is_empty() && self.unformed.is_empty()
    }

    /// Canonical order: identity, zone instance, then D
    fn sort(&mut self) {
        self.formed.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self.unformed.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }
}

/// Find every formed and unformed pattern in `extremums`, both orientations.
///
/// `bars` must be the slice the extremums were extracted from; it is used
/// for containment and crossing checks. Output order is deterministic.
pub fn match_patterns<T: OHLCV>(
    extremums: &[ExtremumPoint],
    bars: &[T],
    catalog: &Catalog,
    options: &MatchOptions,
) -> MatchResult {
    let mut result = fast::search(extremums, bars, catalog, options);
    result.sort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_span_allows() {
        assert!(LegSpan::Unbounded.allows(0, 10_000));
        assert!(LegSpan::Bounded(5).allows(3, 8));
        assert!(!LegSpan::Bounded(5).allows(3, 9));
    }

    #[test]
    fn test_leg_span_serde() {
        let bounded: LegSpan = serde_json::from_str("12").unwrap();
        assert_eq!(bounded, LegSpan::Bounded(12));
        let unbounded: LegSpan = serde_json::from_str("\"unbounded\"").unwrap();
        assert_eq!(unbounded, LegSpan::Unbounded);
        assert!(serde_json::from_str::<LegSpan>("-3").is_err());
        assert_eq!(serde_json::to_string(&LegSpan::Bounded(7)).unwrap(), "7");
    }

    #[test]
    fn test_too_few_extremums() {
        let bars: Vec<crate::Bar> = Vec::new();
        let result = match_patterns(&[], &bars, &Catalog::harmonic(), &MatchOptions::default());
        assert!(result.is_empty());
    }
}
