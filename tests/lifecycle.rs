//! Pattern lifecycle scenarios driven through the public tracker API

use harmonix::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn polyline(pivots: &[(usize, f64)]) -> Vec<Bar> {
    let mut bars = Vec::new();
    for pair in pivots.windows(2) {
        let ((i0, p0), (i1, p1)) = (pair[0], pair[1]);
        let start = if bars.is_empty() { i0 } else { i0 + 1 };
        for i in start..=i1 {
            let t = (i - i0) as f64 / (i1 - i0) as f64;
            let p = p0 + (p1 - p0) * t;
            bars.push(Bar::new(i as i64, p, p, p, p, 1.0));
        }
    }
    bars
}

/// Tracker holding the unformed bullish ABCD of A=100, B=80, C=92
fn pending_abcd() -> (PatternTracker, Vec<Bar>, Vec<ExtremumPoint>) {
    let bars = polyline(&[(0, 95.0), (2, 100.0), (6, 80.0), (9, 92.0), (12, 86.0)]);
    let extremums = extract(&bars, 1);
    let catalog = Catalog::harmonic();
    let result = match_patterns(&extremums, &bars, &catalog, &MatchOptions::default());

    let mut tracker = PatternTracker::new(catalog);
    let only_abcd = MatchResult {
        formed: Vec::new(),
        unformed: result.unformed.into_iter().filter(|r| r.name() == "ABCD").collect(),
    };
    assert_eq!(only_abcd.unformed.len(), 1);
    tracker.ingest(&only_abcd, 13);
    (tracker, bars, extremums)
}

#[test]
fn test_first_touch_enters_zone() {
    let (mut tracker, mut bars, extremums) = pending_abcd();
    let zone = tracker.patterns()[0].bounds();
    assert!((zone.low - 72.584).abs() < 1e-9);
    assert!((zone.high - 76.76).abs() < 1e-9);

    bars.push(Bar::new(13, 78.0, 78.0, 75.0, 77.0, 1.0));
    tracker.update(13, &bars, &extremums);

    let p = &tracker.patterns()[0];
    assert_eq!(p.status(), PatternStatus::InZone);
    assert_eq!(p.entry(), Some(PatternPoint::new(13, 75.0)));
    assert_eq!(p.zone_entries().len(), 1);
    assert_eq!(p.zone_entries()[0].outcome, ZoneOutcome::Open);

    let transitions = tracker.drain_transitions();
    assert_eq!(transitions.len(), 1);
    assert_eq!((transitions[0].from, transitions[0].to), (PatternStatus::Pending, PatternStatus::InZone));
}

#[test]
fn test_straddling_bar_is_invalid_not_success() {
    let (mut tracker, mut bars, extremums) = pending_abcd();
    bars.push(Bar::new(13, 86.0, 95.0, 70.0, 90.0, 1.0));
    tracker.update(13, &bars, &extremums);

    let p = &tracker.patterns()[0];
    assert_eq!(p.status(), PatternStatus::InvalidPrz);
    assert_eq!(p.zone_entries()[0].outcome, ZoneOutcome::Invalid);
    let path: Vec<PatternStatus> = tracker.drain_transitions().iter().map(|t| t.to).collect();
    assert_eq!(path, vec![PatternStatus::InZone, PatternStatus::InvalidPrz]);
}

#[test]
fn test_each_d_line_is_its_own_entry() {
    let ratios = LegRatios { ab_xa: Some(42.86), bc_ab: 83.33, cd_bc: None, ad_xa: None };
    let record = PatternRecord::xabcd(
        "Gartley",
        Orientation::Bullish,
        [
            PatternPoint::new(0, 60.0),
            PatternPoint::new(3, 130.0),
            PatternPoint::new(6, 100.0),
            PatternPoint::new(9, 125.0),
        ],
        None,
        vec![110.0, 112.0, 115.0],
        ratios,
        0.7,
    );
    let mut tracker = PatternTracker::default();
    tracker.ingest(&MatchResult { formed: Vec::new(), unformed: vec![record] }, 10);

    let mut bars: Vec<Bar> = (0..10).map(|i| Bar::new(i, 120.0, 120.5, 119.5, 120.0, 1.0)).collect();
    bars.push(Bar::new(10, 113.0, 113.0, 111.0, 112.5, 1.0));
    tracker.update(10, &bars, &[]);
    assert_eq!(tracker.patterns()[0].status(), PatternStatus::InZone);
    assert_eq!(tracker.patterns()[0].zone_entries().len(), 1);
    assert_eq!(tracker.patterns()[0].zone_entries()[0].level, Some(1));
    assert_eq!(tracker.drain_transitions().len(), 1);

    bars.push(Bar::new(11, 113.5, 115.5, 113.5, 114.0, 1.0));
    tracker.update(11, &bars, &[]);
    let p = &tracker.patterns()[0];
    assert_eq!(p.status(), PatternStatus::InZone);
    let levels: Vec<Option<usize>> = p.zone_entries().iter().map(|e| e.level).collect();
    assert_eq!(levels, vec![Some(1), Some(2)]);
    assert!(tracker.drain_transitions().is_empty());
}

#[test]
fn test_alerts_fire_once_per_status() {
    let (mut tracker, mut bars, extremums) = pending_abcd();
    let mut ledger = InMemoryAlertLedger::default();
    bars.push(Bar::new(13, 78.0, 78.0, 75.0, 77.0, 1.0));
    tracker.update(13, &bars, &extremums);
    let transitions = tracker.drain_transitions();

    let first = dispatch(&transitions, &mut ledger);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].to, PatternStatus::InZone);
    assert!(dispatch(&transitions, &mut ledger).is_empty());
}

#[test]
fn test_alert_replay_after_restart() {
    let (mut tracker, mut bars, extremums) = pending_abcd();
    bars.push(Bar::new(13, 86.0, 95.0, 70.0, 90.0, 1.0));
    tracker.update(13, &bars, &extremums);
    let history = tracker.drain_transitions();
    assert_eq!(history.len(), 2);

    let mut ledger = InMemoryAlertLedger::new();
    let sent: Vec<PatternStatus> = dispatch(&history, &mut ledger).iter().map(|t| t.to).collect();
    assert_eq!(sent, vec![PatternStatus::InZone, PatternStatus::InvalidPrz]);
    // the whole history is replayed against the persisted ledger
    assert!(dispatch(&history, &mut ledger).is_empty());
}

// ============================================================
// PROPERTIES
// ============================================================

fn wavy_bars() -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((-4.0f64..4.0, 0.2f64..3.0), 40..90).prop_map(|steps| {
        let mut close = 100.0;
        steps
            .into_iter()
            .enumerate()
            .map(|(i, (delta, range))| {
                let open = close;
                close = (open + delta).max(5.0);
                Bar::new(i as i64, open, open.max(close) + range / 2.0, open.min(close) - range / 2.0, close, 1.0)
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_transitions_follow_state_graph(bars in wavy_bars(), window in 1usize..4) {
        let params = BacktestParams {
            extremum_window: Period::new(window).unwrap(),
            ..Default::default()
        };
        let mut engine = WalkForwardEngine::new(params).unwrap();
        engine.run(&bars).unwrap();

        let mut by_pattern: BTreeMap<TrackedId, Vec<&StatusTransition>> = BTreeMap::new();
        for t in engine.transitions() {
            prop_assert!(t.from.can_transition_to(t.to));
            prop_assert_ne!(t.to, PatternStatus::Pending);
            by_pattern.entry(t.id).or_default().push(t);
        }
        for (id, chain) in &by_pattern {
            prop_assert_eq!(chain[0].from, PatternStatus::Pending);
            for pair in chain.windows(2) {
                prop_assert_eq!(pair[0].to, pair[1].from);
                prop_assert!(pair[0].bar_index <= pair[1].bar_index);
            }
            let last = chain[chain.len() - 1].to;
            let pattern = engine.tracker().get(*id).unwrap();
            prop_assert_eq!(pattern.status(), last);
        }
    }
}
