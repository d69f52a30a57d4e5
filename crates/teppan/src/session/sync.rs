use tracing::trace;

use super::store::{SessionId, SessionStore};

/// Reconcile two stores' views of one session before dependent work.
///
/// The newer entry (by logical timestamp, absent comparing as oldest) is
/// copied into the store holding the older one. This must run to completion
/// before either engine is invoked for the call: an engine reading a stale
/// cache would attend to the wrong history. Re-synchronizing already equal
/// stores performs no writes.
pub fn synchronize(a: &SessionStore, b: &SessionStore, id: &SessionId) {
    let entry_a = a.get(id);
    let entry_b = b.get(id);

    match (entry_a, entry_b) {
        // First use of the session anywhere.
        (None, None) => {}
        (Some(newer), None) => b.transfer(newer),
        (None, Some(newer)) => a.transfer(newer),
        (Some(entry_a), Some(entry_b)) => {
            if entry_a.timestamp > entry_b.timestamp {
                trace!(session = %id, "copying newer cache entry into second store");
                b.transfer(entry_a);
            } else if entry_b.timestamp > entry_a.timestamp {
                trace!(session = %id, "copying newer cache entry into first store");
                a.transfer(entry_b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CacheClock;

    fn pair() -> (SessionStore, SessionStore) {
        let clock = CacheClock::new();
        (
            SessionStore::new(clock.clone(), 16),
            SessionStore::new(clock, 16),
        )
    }

    #[test]
    fn first_use_is_a_noop() {
        let (a, b) = pair();
        let id = SessionId::from("fresh");
        synchronize(&a, &b, &id);
        assert!(!a.has(&id));
        assert!(!b.has(&id));
    }

    #[test]
    fn newer_entry_wins_in_both_directions() {
        let (a, b) = pair();
        let id = SessionId::from("s");

        a.touch(&id, 3).unwrap();
        synchronize(&a, &b, &id);
        assert_eq!(b.non_blank_rows(&id), 3);

        b.touch(&id, 7).unwrap();
        synchronize(&a, &b, &id);
        assert_eq!(a.non_blank_rows(&id), 7);
    }

    #[test]
    fn equal_timestamps_perform_no_writes() {
        let (a, b) = pair();
        let id = SessionId::from("s");
        let entry = a.touch(&id, 4).unwrap();
        b.transfer(entry);

        synchronize(&a, &b, &id);
        let after_a = a.get(&id).unwrap();
        let after_b = b.get(&id).unwrap();
        assert_eq!(after_a.timestamp, after_b.timestamp);
        assert_eq!(after_a.valid_rows, 4);
        assert_eq!(after_b.valid_rows, 4);
    }
}
