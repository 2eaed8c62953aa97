//! Pattern lifecycle tracking
//!
//! Every distinct (identity, zone instance) gets one [`TrackedPattern`] that is
//! never removed, only transitioned:
//!
//! ```text
//! pending ──> in_zone ──> success
//!    │           │
//!    │           └──────> invalid_prz ──> failed_prz
//!    └──> dismissed
//! ```
//!
//! The tracker consumes matcher output with [`PatternTracker::ingest`] and
//! advances all live patterns one bar at a time with [`PatternTracker::update`];
//! [`PatternTracker::step`] does both in the order a replay needs.

mod lifecycle;
mod revision;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::extremum::ExtremumPoint;
use crate::matcher::MatchResult;
use crate::record::{
    Orientation, PatternKind, PatternPoint, PatternRecord, PriceZone, Projection, TrackingKey,
};
use crate::OHLCV;

use revision::Revision;

// ============================================================
// STATUS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternStatus {
    Pending,
    InZone,
    Success,
    InvalidPrz,
    FailedPrz,
    Dismissed,
}

impl PatternStatus {
    /// No further transitions possible. `InvalidPrz` is not terminal: it may still fail.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PatternStatus::Success | PatternStatus::FailedPrz | PatternStatus::Dismissed
        )
    }

    pub fn can_transition_to(self, next: PatternStatus) -> bool {
        use PatternStatus::*;
        matches!(
            (self, next),
            (Pending, InZone) | (Pending, Dismissed) | (InZone, Success) | (InZone, InvalidPrz) | (InvalidPrz, FailedPrz)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternStatus::Pending => "pending",
            PatternStatus::InZone => "in_zone",
            PatternStatus::Success => "success",
            PatternStatus::InvalidPrz => "invalid_prz",
            PatternStatus::FailedPrz => "failed_prz",
            PatternStatus::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for PatternStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissalReason {
    /// Closed beyond B in the invalidating direction before reaching the zone
    CloseBeyondB,
    /// C revision left no level that price has not already traded through
    NoValidProjection,
}

// ============================================================
// ZONE ENTRIES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneOutcome {
    Open,
    Success,
    Invalid,
}

/// One bar touching one projected zone or d-line
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoneEntry {
    pub bar_index: usize,
    pub price: f64,
    /// Index into the d-line set; `None` for an ABCD zone
    pub level: Option<usize>,
    pub outcome: ZoneOutcome,
}

// ============================================================
// EVENTS
// ============================================================

/// Arena index of a tracked pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackedId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusTransition {
    pub id: TrackedId,
    /// Key the pattern was first tracked under
    pub key: TrackingKey,
    pub name: &'static str,
    pub from: PatternStatus,
    pub to: PatternStatus,
    pub bar_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A formed record arrived without an unformed record before it
    FormedWithoutPrecursor,
    /// C revision produced no valid projection
    NoProjectionAfterRevision,
}

/// Non-fatal tracking inconsistency
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackingWarning {
    pub bar_index: usize,
    pub key: TrackingKey,
    pub kind: WarningKind,
}

// ============================================================
// TRACKED PATTERN
// ============================================================

#[derive(Debug, Clone, Serialize)]
pub struct TrackedPattern {
    id: TrackedId,
    record: PatternRecord,
    c: PatternPoint,
    d: Option<PatternPoint>,
    projection: Projection,
    status: PatternStatus,
    detected_at: usize,
    signal_eligible: bool,
    entries: Vec<ZoneEntry>,
    entry: Option<PatternPoint>,
    exit: Option<PatternPoint>,
    reversal: Option<PatternPoint>,
    violation_bar: Option<usize>,
    bars_to_failure: Option<usize>,
    dismissal: Option<DismissalReason>,
    revisions: usize,
}

impl TrackedPattern {
    fn new(id: TrackedId, record: PatternRecord, detected_at: usize, signal_eligible: bool) -> Self {
        Self {
            id,
            c: record.c(),
            d: record.d(),
            projection: record.projection().clone(),
            record,
            status: PatternStatus::Pending,
            detected_at,
            signal_eligible,
            entries: Vec::new(),
            entry: None,
            exit: None,
            reversal: None,
            violation_bar: None,
            bars_to_failure: None,
            dismissal: None,
            revisions: 0,
        }
    }

    pub fn id(&self) -> TrackedId {
        self.id
    }

    /// Record as first detected; C and the projection may since have been revised
    pub fn record(&self) -> &PatternRecord {
        &self.record
    }

    pub fn key(&self) -> TrackingKey {
        self.record.tracking_key()
    }

    /// Key under the current C
    pub fn current_key(&self) -> TrackingKey {
        let mut key = self.key();
        key.identity.c_idx = self.c.bar_index;
        key
    }

    pub fn name(&self) -> &'static str {
        self.record.name()
    }

    pub fn kind(&self) -> PatternKind {
        self.record.kind()
    }

    pub fn orientation(&self) -> Orientation {
        self.record.orientation()
    }

    pub fn score(&self) -> f64 {
        self.record.score()
    }

    pub fn x(&self) -> Option<PatternPoint> {
        self.record.x()
    }

    pub fn a(&self) -> PatternPoint {
        self.record.a()
    }

    pub fn b(&self) -> PatternPoint {
        self.record.b()
    }

    pub fn c(&self) -> PatternPoint {
        self.c
    }

    pub fn d(&self) -> Option<PatternPoint> {
        self.d
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn bounds(&self) -> PriceZone {
        self.projection.bounds()
    }

    pub fn status(&self) -> PatternStatus {
        self.status
    }

    pub fn detected_at(&self) -> usize {
        self.detected_at
    }

    /// Whether the pattern was first seen unformed and may drive a trade signal
    pub fn signal_eligible(&self) -> bool {
        self.signal_eligible
    }

    pub fn zone_entries(&self) -> &[ZoneEntry] {
        &self.entries
    }

    /// First zone touch
    pub fn entry(&self) -> Option<PatternPoint> {
        self.entry
    }

    /// Where price left the zone, for success or violation
    pub fn exit(&self) -> Option<PatternPoint> {
        self.exit
    }

    pub fn reversal(&self) -> Option<PatternPoint> {
        self.reversal
    }

    pub fn violation_bar(&self) -> Option<usize> {
        self.violation_bar
    }

    pub fn bars_to_failure(&self) -> Option<usize> {
        self.bars_to_failure
    }

    pub fn dismissal(&self) -> Option<DismissalReason> {
        self.dismissal
    }

    pub fn revisions(&self) -> usize {
        self.revisions
    }

    fn set_status(&mut self, to: PatternStatus, bar_index: usize, log: &mut Vec<StatusTransition>) {
        debug_assert!(
            self.status.can_transition_to(to),
            "illegal transition {} -> {}",
            self.status,
            to
        );
        let transition = StatusTransition {
            id: self.id,
            key: self.key(),
            name: self.name(),
            from: self.status,
            to,
            bar_index,
        };
        debug!(
            pattern = transition.name,
            orientation = ?self.orientation(),
            from = %transition.from,
            to = %transition.to,
            bar = bar_index,
            "pattern status changed"
        );
        self.status = to;
        log.push(transition);
    }

    fn resolve_entries(&mut self, outcome: ZoneOutcome) {
        for entry in self.entries.iter_mut().filter(|e| e.outcome == ZoneOutcome::Open) {
            entry.outcome = outcome;
        }
    }
}

// ============================================================
// TRACKER
// ============================================================

/// Owns every tracked pattern of one run
#[derive(Debug, Clone)]
pub struct PatternTracker {
    catalog: Catalog,
    patterns: Vec<TrackedPattern>,
    /// Original and revised keys
    index: HashMap<TrackingKey, TrackedId>,
    active: Vec<TrackedId>,
    transitions: Vec<StatusTransition>,
    warnings: Vec<TrackingWarning>,
    newly_pending: Vec<TrackedId>,
}

impl Default for PatternTracker {
    fn default() -> Self {
        Self::new(Catalog::default())
    }
}

impl PatternTracker {
    /// `catalog` must hold the definitions the ingested records were matched with
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            patterns: Vec::new(),
            index: HashMap::new(),
            active: Vec::new(),
            transitions: Vec::new(),
            warnings: Vec::new(),
            newly_pending: Vec::new(),
        }
    }

    /// Register new unformed patterns and attach D to known ones.
    ///
    /// Unformed records are processed first so a formed record in the same
    /// batch finds its precursor.
    pub fn ingest(&mut self, result: &MatchResult, bar_index: usize) {
        for record in &result.unformed {
            if !self.index.contains_key(&record.tracking_key()) {
                let id = self.insert(record.clone(), bar_index, true);
                self.newly_pending.push(id);
            }
        }

        for record in &result.formed {
            let key = record.tracking_key();
            match self.index.get(&key).copied() {
                Some(id) => {
                    let pattern = &mut self.patterns[id.0];
                    if !pattern.status.is_terminal() && pattern.d.is_none() {
                        pattern.d = record.d();
                    }
                }
                None => {
                    warn!(pattern = record.name(), bar = bar_index, "formed pattern without unformed precursor");
                    self.warnings.push(TrackingWarning {
                        bar_index,
                        key,
                        kind: WarningKind::FormedWithoutPrecursor,
                    });
                    self.insert(record.clone(), bar_index, false);
                }
            }
        }
    }

    fn insert(&mut self, record: PatternRecord, bar_index: usize, signal_eligible: bool) -> TrackedId {
        let id = TrackedId(self.patterns.len());
        self.index.insert(record.tracking_key(), id);
        self.patterns.push(TrackedPattern::new(id, record, bar_index, signal_eligible));
        self.active.push(id);
        id
    }

    /// Advance every live pattern against `bars[bar_index]`.
    ///
    /// `extremums` are the confirmed swing points available at this bar; they
    /// drive C revision. Bars after `bar_index` are never read.
    pub fn update<T: OHLCV>(&mut self, bar_index: usize, bars: &[T], extremums: &[ExtremumPoint]) {
        self.step(None, bar_index, bars, extremums);
    }

    /// One bar of tracking: C revision, then `result` (when detection ran),
    /// then the per-bar state machine.
    ///
    /// Revising first means a swing that moves an existing pattern's C is
    /// matched to that pattern instead of being registered a second time.
    pub fn step<T: OHLCV>(
        &mut self,
        result: Option<&MatchResult>,
        bar_index: usize,
        bars: &[T],
        extremums: &[ExtremumPoint],
    ) {
        let history = &bars[..bar_index.min(bars.len())];
        self.revise_pending(bar_index, history, extremums);
        if let Some(result) = result {
            self.ingest(result, bar_index);
        }
        let Some(bar) = bars.get(bar_index) else {
            return;
        };

        for &id in &self.active {
            lifecycle::advance(&mut self.patterns[id.0], bar_index, bar, &mut self.transitions);
        }
        let patterns = &self.patterns;
        self.active.retain(|id| !patterns[id.0].status.is_terminal());
    }

    fn revise_pending<T: OHLCV>(&mut self, bar_index: usize, history: &[T], extremums: &[ExtremumPoint]) {
        for &id in &self.active {
            let pattern = &mut self.patterns[id.0];
            if pattern.status != PatternStatus::Pending {
                continue;
            }
            let def = self.catalog.get(pattern.name());
            let index = &self.index;
            let taken = |key: &TrackingKey| index.get(key).is_some_and(|&other| other != id);
            match revision::revise(pattern, def, extremums, history, bar_index, taken) {
                Revision::Unchanged => {}
                Revision::Revised => {
                    self.index.insert(pattern.current_key(), id);
                }
                Revision::Exhausted => {
                    warn!(pattern = pattern.name(), bar = bar_index, "C revision left no valid projection");
                    self.warnings.push(TrackingWarning {
                        bar_index,
                        key: pattern.key(),
                        kind: WarningKind::NoProjectionAfterRevision,
                    });
                    pattern.dismissal = Some(DismissalReason::NoValidProjection);
                    pattern.set_status(PatternStatus::Dismissed, bar_index, &mut self.transitions);
                }
            }
        }
    }

    pub fn get(&self, id: TrackedId) -> Option<&TrackedPattern> {
        self.patterns.get(id.0)
    }

    /// Lookup by original or revised key
    pub fn find(&self, key: &TrackingKey) -> Option<&TrackedPattern> {
        self.index.get(key).and_then(|id| self.get(*id))
    }

    pub fn patterns(&self) -> &[TrackedPattern] {
        &self.patterns
    }

    /// Patterns that are not yet terminal
    pub fn active(&self) -> impl Iterator<Item = &TrackedPattern> {
        self.active.iter().map(|id| &self.patterns[id.0])
    }

    pub fn zone_entries(&self) -> impl Iterator<Item = &ZoneEntry> {
        self.patterns.iter().flat_map(|p| p.entries.iter())
    }

    /// Transitions recorded since the last drain
    pub fn drain_transitions(&mut self) -> Vec<StatusTransition> {
        std::mem::take(&mut self.transitions)
    }

    /// Unformed patterns registered since the last call
    pub fn take_newly_pending(&mut self) -> Vec<TrackedId> {
        std::mem::take(&mut self.newly_pending)
    }

    pub fn warnings(&self) -> &[TrackingWarning] {
        &self.warnings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
        self.index.clear();
        self.active.clear();
        self.transitions.clear();
        self.warnings.clear();
        self.newly_pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LegRatios;
    use crate::Bar;

    fn pt(i: usize, p: f64) -> PatternPoint {
        PatternPoint::new(i, p)
    }

    fn abcd(d: Option<PatternPoint>) -> PatternRecord {
        PatternRecord::abcd(
            "ABCD",
            Orientation::Bullish,
            [pt(1, 100.0), pt(3, 80.0), pt(5, 92.0)],
            d,
            0,
            PriceZone::new(72.584, 76.76),
            LegRatios { bc_ab: 60.0, ..Default::default() },
            0.8,
        )
    }

    fn result(formed: Vec<PatternRecord>, unformed: Vec<PatternRecord>) -> MatchResult {
        MatchResult { formed, unformed }
    }

    #[test]
    fn test_ingest_deduplicates() {
        let mut tracker = PatternTracker::default();
        tracker.ingest(&result(vec![], vec![abcd(None)]), 8);
        tracker.ingest(&result(vec![], vec![abcd(None)]), 9);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.take_newly_pending(), vec![TrackedId(0)]);
        assert!(tracker.take_newly_pending().is_empty());
    }

    #[test]
    fn test_formed_merges_into_precursor() {
        let mut tracker = PatternTracker::default();
        tracker.ingest(&result(vec![], vec![abcd(None)]), 8);
        tracker.ingest(&result(vec![abcd(Some(pt(10, 75.0)))], vec![]), 12);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.patterns()[0].d(), Some(pt(10, 75.0)));
        assert!(tracker.warnings().is_empty());
    }

    #[test]
    fn test_formed_without_precursor_warns() {
        let mut tracker = PatternTracker::default();
        tracker.ingest(&result(vec![abcd(Some(pt(10, 75.0)))], vec![]), 12);
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.patterns()[0].signal_eligible());
        assert!(tracker.take_newly_pending().is_empty());
        assert_eq!(tracker.warnings()[0].kind, WarningKind::FormedWithoutPrecursor);
    }

    #[test]
    fn test_close_beyond_b_dismisses() {
        let mut tracker = PatternTracker::default();
        tracker.ingest(&result(vec![], vec![abcd(None)]), 6);
        let mut bars: Vec<Bar> = (0..6).map(|i| Bar::new(i, 90.0, 91.0, 89.0, 90.0, 1.0)).collect();
        bars.push(Bar::new(6, 81.0, 82.0, 78.0, 79.0, 1.0));
        tracker.update(6, &bars, &[]);
        let p = &tracker.patterns()[0];
        assert_eq!(p.status(), PatternStatus::Dismissed);
        assert_eq!(p.dismissal(), Some(DismissalReason::CloseBeyondB));
        assert_eq!(tracker.active().count(), 0);
    }

    fn revised_abcd() -> PatternRecord {
        PatternRecord::abcd(
            "ABCD",
            Orientation::Bullish,
            [pt(1, 100.0), pt(3, 80.0), pt(7, 95.0)],
            None,
            0,
            PriceZone::new(70.73, 75.95),
            LegRatios { bc_ab: 75.0, ..Default::default() },
            0.8,
        )
    }

    fn quiet_bars(n: i64) -> Vec<Bar> {
        (0..n).map(|i| Bar::new(i, 90.0, 91.0, 89.0, 90.0, 1.0)).collect()
    }

    #[test]
    fn test_revised_c_absorbs_new_detection() {
        let mut tracker = PatternTracker::default();
        tracker.ingest(&result(vec![], vec![abcd(None)]), 6);
        let swing = [ExtremumPoint { bar_index: 7, price: 95.0, is_high: true }];
        tracker.step(Some(&result(vec![], vec![revised_abcd()])), 8, &quiet_bars(9), &swing);

        assert_eq!(tracker.len(), 1);
        let p = &tracker.patterns()[0];
        assert_eq!(p.c(), pt(7, 95.0));
        assert_eq!(p.revisions(), 1);
        assert_eq!(tracker.find(&revised_abcd().tracking_key()).map(|p| p.id()), Some(TrackedId(0)));
        assert_eq!(tracker.take_newly_pending(), vec![TrackedId(0)]);
    }

    #[test]
    fn test_revision_never_duplicates_a_key() {
        let mut tracker = PatternTracker::default();
        tracker.ingest(&result(vec![], vec![abcd(None), revised_abcd()]), 8);
        let swing = [ExtremumPoint { bar_index: 7, price: 95.0, is_high: true }];
        tracker.update(8, &quiet_bars(9), &swing);

        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.patterns()[0].c().bar_index, 5);
        assert_eq!(tracker.patterns()[0].revisions(), 0);
        assert_ne!(tracker.patterns()[0].current_key(), tracker.patterns()[1].current_key());
    }

    #[test]
    fn test_transition_graph() {
        use PatternStatus::*;
        assert!(Pending.can_transition_to(InZone));
        assert!(InZone.can_transition_to(InvalidPrz));
        assert!(InvalidPrz.can_transition_to(FailedPrz));
        assert!(!InZone.can_transition_to(Pending));
        assert!(!Success.can_transition_to(InvalidPrz));
        assert!(!InvalidPrz.is_terminal());
        assert!(Dismissed.is_terminal());
    }
}
