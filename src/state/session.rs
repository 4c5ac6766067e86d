//! Per-user session entry shared between the registry, the lifecycle
//! controller and the dispatch pipeline.
//!
//! # Locking
//!
//! - `record` is a `parking_lot::RwLock` held only for copy-sized critical
//!   sections, never across `.await`.
//! - `dispatch_lock` is an async mutex serializing dispatch jobs (and handle
//!   release) for this one session.
//! - `ready` is cancelled the moment the session leaves `Ready` (or can no
//!   longer reach it); in-flight dispatches watch it.

use crate::client::ClientHandle;
use crate::error::SessionError;
use crate::state::machine::Input;
use crate::state::{SessionRecord, SessionSnapshot, SessionState, Transition, UserId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

pub struct Session {
    user_id: UserId,
    record: RwLock<SessionRecord>,
    ready: CancellationToken,
    dispatch_lock: Mutex<()>,
}

impl Session {
    pub fn new(user_id: impl Into<UserId>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            record: RwLock::new(SessionRecord::new(now)),
            ready: CancellationToken::new(),
            dispatch_lock: Mutex::new(()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> SessionState {
        self.record.read().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.record.read().last_activity
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.record.read().snapshot(&self.user_id)
    }

    /// The pairing code, only while `AwaitingScan`.
    pub fn qr_code(&self) -> Result<String, SessionError> {
        let record = self.record.read();
        match (&record.state, &record.qr_payload) {
            (SessionState::AwaitingScan, Some(qr)) => Ok(qr.clone()),
            (state, _) => Err(SessionError::NotAvailable { state: *state }),
        }
    }

    /// Record activity on this session (dispatch attempts).
    pub fn touch(&self, now: DateTime<Utc>) {
        self.record.write().last_activity = now;
    }

    /// Apply a lifecycle input.
    ///
    /// Only the lifecycle controller calls this. Leaving `Ready`, or landing
    /// in any state that can no longer become `Ready`, cancels the ready
    /// token so in-flight dispatches stop at their next cancellation point.
    pub(crate) fn apply(&self, input: Input<'_>, now: DateTime<Utc>) -> Option<Transition> {
        let transition = self.record.write().apply(&input, now)?;
        crate::metrics::record_transition(transition.to.as_str());
        if !transition.to.accepts_events() || transition.from == SessionState::Ready {
            self.ready.cancel();
        }
        Some(transition)
    }

    /// Install the client handle once connected.
    ///
    /// Fails (handing the handle back) if the session died while connecting;
    /// the caller must close it.
    pub(crate) fn attach_handle(
        &self,
        handle: Arc<dyn ClientHandle>,
    ) -> Result<(), Arc<dyn ClientHandle>> {
        let mut record = self.record.write();
        if !record.state.accepts_events() {
            return Err(handle);
        }
        record.handle = Some(handle);
        Ok(())
    }

    /// Take the handle out of the record. After this it is no longer
    /// retrievable from the session.
    pub(crate) fn take_handle(&self) -> Option<Arc<dyn ClientHandle>> {
        self.record.write().handle.take()
    }

    /// Borrow the handle for one capability call, only while `Ready`.
    pub fn ready_handle(&self) -> Result<Arc<dyn ClientHandle>, SessionError> {
        let record = self.record.read();
        match (&record.state, &record.handle) {
            (SessionState::Ready, Some(handle)) => Ok(Arc::clone(handle)),
            (state, _) => Err(SessionError::InvalidState {
                user_id: self.user_id.clone(),
                state: *state,
            }),
        }
    }

    /// Resolves once the session has left `Ready` for good.
    pub fn lost(&self) -> WaitForCancellationFuture<'_> {
        self.ready.cancelled()
    }

    pub(crate) async fn lock_dispatch(&self) -> MutexGuard<'_, ()> {
        self.dispatch_lock.lock().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("record", &*self.record.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientEvent;
    use crate::client::loopback::LoopbackHandle;

    fn ready_session() -> Session {
        let s = Session::new("u1", Utc::now());
        assert!(s.attach_handle(Arc::new(LoopbackHandle::detached())).is_ok());
        s.apply(Input::Event(&ClientEvent::Ready), Utc::now());
        s
    }

    #[test]
    fn qr_only_while_awaiting_scan() {
        let s = Session::new("u1", Utc::now());
        assert!(matches!(
            s.qr_code(),
            Err(SessionError::NotAvailable {
                state: SessionState::Initializing
            })
        ));
        s.apply(Input::Event(&ClientEvent::Qr("pair-me".into())), Utc::now());
        assert_eq!(s.qr_code().unwrap(), "pair-me");
        s.apply(Input::Event(&ClientEvent::Authenticated), Utc::now());
        assert!(matches!(
            s.qr_code(),
            Err(SessionError::NotAvailable {
                state: SessionState::Ready
            })
        ));
    }

    #[test]
    fn ready_handle_requires_ready() {
        let s = Session::new("u1", Utc::now());
        assert!(s.attach_handle(Arc::new(LoopbackHandle::detached())).is_ok());
        assert!(matches!(
            s.ready_handle(),
            Err(SessionError::InvalidState { .. })
        ));
        s.apply(Input::Event(&ClientEvent::Ready), Utc::now());
        assert!(s.ready_handle().is_ok());
    }

    #[tokio::test]
    async fn leaving_ready_cancels_token() {
        let s = ready_session();
        s.apply(
            Input::Event(&ClientEvent::Disconnected("logout".into())),
            Utc::now(),
        );
        // Would hang if the token had not been cancelled.
        s.lost().await;
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn handle_is_gone_after_take() {
        let s = ready_session();
        assert!(s.take_handle().is_some());
        assert!(s.take_handle().is_none());
        assert!(s.ready_handle().is_err());
    }

    #[test]
    fn attach_after_destroy_hands_handle_back() {
        let s = Session::new("u1", Utc::now());
        s.apply(Input::Destroy, Utc::now());
        assert!(s.attach_handle(Arc::new(LoopbackHandle::detached())).is_err());
    }
}
