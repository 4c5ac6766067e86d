//! Session record data.

use crate::client::ClientHandle;
use crate::state::machine::{self, Input};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Opaque, stable user identifier. Unique key in the registry.
pub type UserId = String;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    AwaitingScan,
    Ready,
    Disconnected,
    Failed,
    Destroyed,
}

impl SessionState {
    pub const ALL: [SessionState; 6] = [
        SessionState::Initializing,
        SessionState::AwaitingScan,
        SessionState::Ready,
        SessionState::Disconnected,
        SessionState::Failed,
        SessionState::Destroyed,
    ];

    /// Wire name of the state (`awaiting_scan`, `ready`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingScan => "awaiting_scan",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        }
    }

    /// Whether client events can still move this state.
    #[inline]
    pub fn accepts_events(self) -> bool {
        matches!(self, Self::Initializing | Self::AwaitingScan | Self::Ready)
    }

    /// `Failed` needs an explicit destroy+recreate, `Destroyed` is final.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Destroyed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change applied to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Mutable per-user session data. Lives behind the session's lock.
pub struct SessionRecord {
    pub state: SessionState,
    /// Latest pairing code. Non-empty only while `AwaitingScan`.
    pub qr_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Why the session disconnected or failed.
    pub reason: Option<String>,
    /// Exclusive owner of the client handle. `None` once released.
    pub(crate) handle: Option<Arc<dyn ClientHandle>>,
}

impl SessionRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: SessionState::Initializing,
            qr_payload: None,
            created_at: now,
            last_activity: now,
            reason: None,
            handle: None,
        }
    }

    /// Apply an input to the record.
    ///
    /// Returns the transition if the state changed. A fresh QR while already
    /// awaiting a scan replaces the payload without counting as a transition,
    /// so a never-scanned session still ages out.
    pub fn apply(&mut self, input: &Input<'_>, now: DateTime<Utc>) -> Option<Transition> {
        let to = machine::next_state(self.state, input)?;
        let from = self.state;

        match input {
            Input::Event(crate::client::ClientEvent::Qr(payload)) => {
                self.qr_payload = Some(payload.clone()).filter(|p| !p.is_empty());
            }
            Input::Event(crate::client::ClientEvent::Disconnected(reason))
            | Input::Event(crate::client::ClientEvent::Error(reason)) => {
                self.reason = Some(reason.clone());
            }
            _ => {}
        }

        if to != SessionState::AwaitingScan {
            self.qr_payload = None;
        }

        if to == from {
            return None;
        }

        self.state = to;
        self.last_activity = now;
        Some(Transition { from, to })
    }

    pub fn snapshot(&self, user_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            user_id: user_id.to_string(),
            state: self.state,
            qr_payload: self.qr_payload.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            reason: self.reason.clone(),
        }
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("state", &self.state)
            .field("qr_payload", &self.qr_payload)
            .field("created_at", &self.created_at)
            .field("last_activity", &self.last_activity)
            .field("reason", &self.reason)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

/// Point-in-time copy of a record, safe to hand to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user_id: UserId,
    pub state: SessionState,
    pub qr_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientEvent;
    use chrono::Duration;

    fn record() -> (SessionRecord, DateTime<Utc>) {
        let t0 = Utc::now();
        (SessionRecord::new(t0), t0)
    }

    #[test]
    fn new_record_is_initializing() {
        let (rec, t0) = record();
        assert_eq!(rec.state, SessionState::Initializing);
        assert_eq!(rec.last_activity, t0);
        assert!(rec.qr_payload.is_none());
    }

    #[test]
    fn qr_is_stored_then_cleared_on_ready() {
        let (mut rec, t0) = record();
        let t1 = t0 + Duration::seconds(5);
        let tr = rec.apply(&Input::Event(&ClientEvent::Qr("code-1".into())), t1);
        assert_eq!(
            tr,
            Some(Transition {
                from: SessionState::Initializing,
                to: SessionState::AwaitingScan
            })
        );
        assert_eq!(rec.qr_payload.as_deref(), Some("code-1"));
        assert_eq!(rec.last_activity, t1);

        rec.apply(&Input::Event(&ClientEvent::Ready), t1);
        assert_eq!(rec.state, SessionState::Ready);
        assert!(rec.qr_payload.is_none());
    }

    #[test]
    fn qr_refresh_is_not_a_transition() {
        let (mut rec, t0) = record();
        rec.apply(&Input::Event(&ClientEvent::Qr("a".into())), t0);
        let later = t0 + Duration::minutes(3);
        let tr = rec.apply(&Input::Event(&ClientEvent::Qr("b".into())), later);
        assert!(tr.is_none());
        assert_eq!(rec.qr_payload.as_deref(), Some("b"));
        assert_eq!(rec.last_activity, t0);
    }

    #[test]
    fn error_keeps_reason() {
        let (mut rec, t0) = record();
        rec.apply(&Input::Event(&ClientEvent::Error("boom".into())), t0);
        assert_eq!(rec.state, SessionState::Failed);
        assert_eq!(rec.reason.as_deref(), Some("boom"));
    }

    #[test]
    fn late_qr_on_ready_session_is_ignored() {
        let (mut rec, t0) = record();
        rec.apply(&Input::Event(&ClientEvent::Authenticated), t0);
        assert!(rec.apply(&Input::Event(&ClientEvent::Qr("x".into())), t0).is_none());
        assert!(rec.qr_payload.is_none());
    }

    #[test]
    fn state_names_are_snake_case() {
        let names: Vec<_> = SessionState::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            [
                "initializing",
                "awaiting_scan",
                "ready",
                "disconnected",
                "failed",
                "destroyed"
            ]
        );
        assert_eq!(
            serde_json::to_string(&SessionState::AwaitingScan).unwrap(),
            "\"awaiting_scan\""
        );
    }
}
