//! Session registry - concurrent map from user id to session.
//!
//! # Thread Safety
//!
//! Reads (`get`, `snapshot`) clone an `Arc<Session>` out of the map and drop
//! the shard guard at once. Work on one user never waits on another user,
//! except for the short `create_gate` section that makes the capacity check
//! and the insert atomic.

use crate::error::SessionError;
use crate::state::{DashMapExt, Session, SessionState, UserId};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of admitting a user into the registry.
#[derive(Debug, Clone)]
pub enum Admission {
    /// A new session was inserted in `Initializing`.
    Created(Arc<Session>),
    /// A live session already exists for this user.
    Existing(Arc<Session>),
}

impl Admission {
    pub fn session(&self) -> &Arc<Session> {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }
}

pub struct SessionRegistry {
    sessions: DashMap<UserId, Arc<Session>>,
    max_sessions: usize,
    create_gate: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
            create_gate: Mutex::new(()),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Number of sessions currently held (none of them `Destroyed` for long:
    /// destroyed sessions are removed right after the transition).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Return the live session for `user_id`, or insert a new one if capacity
    /// allows.
    pub fn admit(&self, user_id: &str) -> Result<Admission, SessionError> {
        if let Some(existing) = self.live(user_id) {
            return Ok(Admission::Existing(existing));
        }

        let _gate = self.create_gate.lock();

        // Re-check under the gate: another create may have won the race.
        let stale = match self.sessions.get_cloned(user_id) {
            Some(s) if s.state() != SessionState::Destroyed => {
                return Ok(Admission::Existing(s));
            }
            Some(_) => 1,
            None => 0,
        };

        if self.sessions.len().saturating_sub(stale) >= self.max_sessions {
            return Err(SessionError::CapacityExceeded {
                max: self.max_sessions,
            });
        }

        let session = Arc::new(Session::new(user_id, Utc::now()));
        self.sessions.insert(user_id.to_string(), Arc::clone(&session));
        crate::metrics::set_live_sessions(self.sessions.len());
        Ok(Admission::Created(session))
    }

    /// Get the session for `user_id`, whatever its state.
    pub fn get(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.get_cloned(user_id)
    }

    /// Get the session for `user_id` unless it is already `Destroyed`.
    pub fn live(&self, user_id: &str) -> Option<Arc<Session>> {
        self.get(user_id).filter(|s| s.state() != SessionState::Destroyed)
    }

    /// Whether `session` is still the registered entry for its user.
    pub fn holds(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .get(session.user_id())
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), session))
    }

    /// Remove `session`, but only if it is still the registered entry (a newer
    /// session for the same user is left alone).
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(session.user_id(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            crate::metrics::set_live_sessions(self.sessions.len());
        }
        removed
    }

    /// Clone out every session (for sweeps and shutdown).
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.values_cloned()
    }

    /// Count sessions by state, for health reporting.
    pub fn count_by_state(&self) -> BTreeMap<SessionState, usize> {
        let mut counts = BTreeMap::new();
        for session in self.snapshot() {
            *counts.entry(session.state()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::machine::Input;

    #[test]
    fn admit_is_idempotent_per_user() {
        let reg = SessionRegistry::new(4);
        let first = reg.admit("alice").unwrap();
        assert!(matches!(first, Admission::Created(_)));
        let second = reg.admit("alice").unwrap();
        assert!(matches!(second, Admission::Existing(_)));
        assert!(Arc::ptr_eq(first.session(), second.session()));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let reg = SessionRegistry::new(2);
        reg.admit("a").unwrap();
        reg.admit("b").unwrap();
        assert_eq!(
            reg.admit("c").unwrap_err(),
            SessionError::CapacityExceeded { max: 2 }
        );
        // Existing users are still admitted at capacity.
        assert!(matches!(reg.admit("a").unwrap(), Admission::Existing(_)));
    }

    #[test]
    fn removal_frees_capacity() {
        let reg = SessionRegistry::new(1);
        let a = reg.admit("a").unwrap().session().clone();
        assert!(reg.admit("b").is_err());
        assert!(reg.remove(&a));
        assert!(reg.admit("b").is_ok());
    }

    #[test]
    fn remove_ignores_replaced_entries() {
        let reg = SessionRegistry::new(2);
        let old = reg.admit("a").unwrap().session().clone();
        old.apply(Input::Destroy, Utc::now());
        // A destroyed entry that was not removed yet is replaced on admit.
        let new = reg.admit("a").unwrap();
        assert!(matches!(new, Admission::Created(_)));
        assert!(!reg.remove(&old));
        assert!(reg.holds(new.session()));
    }

    #[test]
    fn concurrent_admits_never_exceed_capacity() {
        let reg = Arc::new(SessionRegistry::new(8));
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.admit(&format!("user-{i}")).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 8);
        assert_eq!(reg.len(), 8);
    }

    #[test]
    fn counts_by_state() {
        let reg = SessionRegistry::new(4);
        reg.admit("a").unwrap();
        let b = reg.admit("b").unwrap().session().clone();
        b.apply(
            Input::Event(&crate::client::ClientEvent::Qr("q".into())),
            Utc::now(),
        );
        let counts = reg.count_by_state();
        assert_eq!(counts.get(&SessionState::Initializing), Some(&1));
        assert_eq!(counts.get(&SessionState::AwaitingScan), Some(&1));
    }
}
