//! Hand-off to external notification services
//!
//! The core does not store alert state. A caller supplies an [`AlertLedger`]
//! (database table, key-value store, ...) that remembers every status it
//! notified per tracking key, and [`dispatch`] filters a batch of transitions
//! down to the ones that still need a notification. Replaying a whole history
//! after a restart sends nothing twice.

use std::collections::HashSet;

use crate::record::TrackingKey;
use crate::tracker::{PatternStatus, StatusTransition};

/// Lookup-by-identity capability for already-notified patterns
pub trait AlertLedger {
    fn was_notified(&self, key: &TrackingKey, status: PatternStatus) -> bool;
    fn record(&mut self, key: &TrackingKey, status: PatternStatus);
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryAlertLedger {
    notified: HashSet<(TrackingKey, PatternStatus)>,
}

impl InMemoryAlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.notified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notified.is_empty()
    }
}

impl AlertLedger for InMemoryAlertLedger {
    fn was_notified(&self, key: &TrackingKey, status: PatternStatus) -> bool {
        self.notified.contains(&(*key, status))
    }

    fn record(&mut self, key: &TrackingKey, status: PatternStatus) {
        self.notified.insert((*key, status));
    }
}

/// Transitions a user is told about: zone reached, confirmed, or invalidated
pub fn is_notifiable(transition: &StatusTransition) -> bool {
    matches!(
        transition.to,
        PatternStatus::InZone | PatternStatus::Success | PatternStatus::InvalidPrz | PatternStatus::FailedPrz
    )
}

/// Select notifiable transitions not yet recorded in `ledger`, and record them.
pub fn dispatch<L: AlertLedger + ?Sized>(
    transitions: &[StatusTransition],
    ledger: &mut L,
) -> Vec<StatusTransition> {
    let mut out = Vec::new();
    for t in transitions.iter().filter(|t| is_notifiable(t)) {
        if ledger.was_notified(&t.key, t.to) {
            continue;
        }
        ledger.record(&t.key, t.to);
        out.push(*t);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Orientation, PatternIdentity, PatternKind};
    use crate::tracker::TrackedId;

    fn transition(from: PatternStatus, to: PatternStatus) -> StatusTransition {
        let key = TrackingKey {
            identity: PatternIdentity {
                kind: PatternKind::Abcd,
                name: "ABCD",
                orientation: Orientation::Bullish,
                x_idx: None,
                a_idx: 1,
                b_idx: 3,
                c_idx: 5,
            },
            zone_instance: 0,
        };
        StatusTransition { id: TrackedId(0), key, name: "ABCD", from, to, bar_index: 9 }
    }

    #[test]
    fn test_dispatch_skips_already_notified() {
        let mut ledger = InMemoryAlertLedger::new();
        let batch = [transition(PatternStatus::Pending, PatternStatus::InZone)];
        assert_eq!(dispatch(&batch, &mut ledger).len(), 1);
        // restart replays the same history
        assert!(dispatch(&batch, &mut ledger).is_empty());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_dismissal_is_not_notified() {
        let mut ledger = InMemoryAlertLedger::new();
        let batch = [transition(PatternStatus::Pending, PatternStatus::Dismissed)];
        assert!(dispatch(&batch, &mut ledger).is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_later_status_notifies_again() {
        let mut ledger = InMemoryAlertLedger::new();
        let batch = [
            transition(PatternStatus::Pending, PatternStatus::InZone),
            transition(PatternStatus::InZone, PatternStatus::InvalidPrz),
        ];
        let sent = dispatch(&batch, &mut ledger);
        assert_eq!(sent.len(), 2);
        assert!(ledger.was_notified(&batch[0].key, PatternStatus::InZone));
        assert!(ledger.was_notified(&batch[0].key, PatternStatus::InvalidPrz));
    }

    #[test]
    fn test_replayed_history_sends_nothing() {
        let mut ledger = InMemoryAlertLedger::new();
        let history = [
            transition(PatternStatus::Pending, PatternStatus::InZone),
            transition(PatternStatus::InZone, PatternStatus::InvalidPrz),
        ];
        assert_eq!(dispatch(&history, &mut ledger).len(), 2);
        assert!(dispatch(&history, &mut ledger).is_empty());
        assert_eq!(ledger.len(), 2);

        // only the new step goes out
        let extended = [history[0], history[1], transition(PatternStatus::InvalidPrz, PatternStatus::FailedPrz)];
        let sent = dispatch(&extended, &mut ledger);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, PatternStatus::FailedPrz);
    }
}
