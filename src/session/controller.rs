//! Lifecycle controller.
//!
//! Owns the session registry and the client factory. Each created session
//! gets one task that connects the client and then pumps its event channel
//! through the state machine, in emission order. Destruction is driven from
//! here too, whether it comes from a close request, the idle reaper or
//! shutdown.

use crate::client::{ClientConnection, ClientEvent, ClientFactory, ClientHandle};
use crate::config::SessionsConfig;
use crate::error::{ClientError, SessionError};
use crate::state::machine::Input;
use crate::state::{Admission, Session, SessionRegistry, SessionState};
use crate::telemetry::spans;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, warn};

/// Reason recorded when a client drops its event channel.
const STREAM_CLOSED: &str = "event stream closed";

/// Timeouts and limits used by the controller.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_sessions: usize,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
}

impl From<&SessionsConfig> for SessionSettings {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            connect_timeout: config.connect_timeout(),
            close_timeout: config.close_timeout(),
        }
    }
}

/// Result of a destroy request. Destroying never fails from the caller's
/// point of view; a handle that would not close is abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// The session was live and is now destroyed.
    Destroyed,
    /// No session, or it was already being destroyed.
    AlreadyGone,
    /// Destroyed, but closing the client handle failed or timed out.
    HandleAbandoned(SessionError),
}

pub struct SessionManager {
    registry: SessionRegistry,
    factory: Arc<dyn ClientFactory>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(settings: SessionSettings, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            registry: SessionRegistry::new(settings.max_sessions),
            factory,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Create (or return) the session for `user_id`.
    ///
    /// Returns immediately with the current state; connecting and pairing
    /// continue in a background task. Must be called inside a tokio runtime.
    pub fn create_session(&self, user_id: &str) -> Result<SessionState, SessionError> {
        let admission = self.registry.admit(user_id).inspect_err(|e| {
            warn!(user_id = %user_id, error = %e, "Session creation refused");
        })?;

        match admission {
            Admission::Existing(session) => Ok(session.state()),
            Admission::Created(session) => {
                info!(user_id = %user_id, live = self.registry.len(), "Session created");
                crate::metrics::record_transition(SessionState::Initializing.as_str());
                let task = run_session(
                    Arc::clone(&session),
                    Arc::clone(&self.factory),
                    self.settings,
                );
                tokio::spawn(task.instrument(spans::session(user_id)));
                Ok(session.state())
            }
        }
    }

    pub fn session(&self, user_id: &str) -> Option<Arc<Session>> {
        self.registry.get(user_id)
    }

    /// Current state, or `NotFound`. Never waits on other sessions.
    pub fn status(&self, user_id: &str) -> Result<SessionState, SessionError> {
        self.session(user_id)
            .map(|s| s.state())
            .ok_or_else(|| SessionError::NotFound(user_id.to_string()))
    }

    /// Pairing payload; only available while awaiting a scan.
    pub fn qr_code(&self, user_id: &str) -> Result<String, SessionError> {
        self.session(user_id)
            .ok_or_else(|| SessionError::NotFound(user_id.to_string()))?
            .qr_code()
    }

    /// Handle of a `Ready` session, for capability calls.
    pub fn ready_handle(&self, user_id: &str) -> Result<Arc<dyn ClientHandle>, SessionError> {
        self.session(user_id)
            .ok_or_else(|| SessionError::NotFound(user_id.to_string()))?
            .ready_handle()
    }

    /// Destroy the session for `user_id`. Idempotent.
    pub async fn destroy_session(&self, user_id: &str) -> DestroyOutcome {
        match self.session(user_id) {
            Some(session) => self.destroy(&session).await,
            None => DestroyOutcome::AlreadyGone,
        }
    }

    /// Destroy `session` if it has been idle since before `cutoff`.
    ///
    /// Returns `None` when the session was touched in the meantime.
    pub async fn destroy_if_idle(
        &self,
        session: &Arc<Session>,
        cutoff: DateTime<Utc>,
    ) -> Option<DestroyOutcome> {
        if session.state() == SessionState::Destroyed || session.last_activity() >= cutoff {
            return None;
        }
        Some(self.destroy(session).await)
    }

    /// Destroy every session concurrently. Returns how many were live.
    pub async fn shutdown(&self) -> usize {
        let sessions = self.registry.snapshot();
        if sessions.is_empty() {
            return 0;
        }
        info!(count = sessions.len(), "Destroying all sessions");
        join_all(sessions.iter().map(|s| self.destroy(s)))
            .await
            .into_iter()
            .filter(|outcome| *outcome != DestroyOutcome::AlreadyGone)
            .count()
    }

    async fn destroy(&self, session: &Arc<Session>) -> DestroyOutcome {
        let transition = session.apply(Input::Destroy, Utc::now());
        self.registry.remove(session);

        let Some(transition) = transition else {
            return DestroyOutcome::AlreadyGone;
        };
        info!(
            user_id = %session.user_id(),
            from = %transition.from,
            "Session destroyed"
        );

        match release_handle(session, self.settings.close_timeout).await {
            Ok(()) => DestroyOutcome::Destroyed,
            Err(e) => DestroyOutcome::HandleAbandoned(e),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.registry.len())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Connect the client, then drive the session from its events.
async fn run_session(
    session: Arc<Session>,
    factory: Arc<dyn ClientFactory>,
    settings: SessionSettings,
) {
    let connected =
        tokio::time::timeout(settings.connect_timeout, factory.connect(session.user_id())).await;

    let ClientConnection { handle, events } = match connected {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => return fail(&session, &e),
        Err(_) => return fail(&session, &ClientError::Timeout(settings.connect_timeout)),
    };

    let handle: Arc<dyn ClientHandle> = Arc::from(handle);
    if let Err(late) = session.attach_handle(handle) {
        debug!("Session ended while connecting, closing late handle");
        let _ = close_handle(late, settings.close_timeout).await;
        return;
    }
    debug!("Client connected");

    pump_events(&session, events).await;

    // Destroy releases its own handle; disconnects and failures land here.
    if matches!(
        session.state(),
        SessionState::Disconnected | SessionState::Failed
    ) && let Err(e) = release_handle(&session, settings.close_timeout).await
    {
        warn!(error = %e, "Failed to release client handle");
    }
}

/// Apply client events in emission order until the session is dead.
async fn pump_events(session: &Session, mut events: mpsc::Receiver<ClientEvent>) {
    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => {
                event.unwrap_or_else(|| ClientEvent::Disconnected(STREAM_CLOSED.to_string()))
            }
            _ = session.lost() => break,
        };

        match session.apply(Input::Event(&event), Utc::now()) {
            Some(t) => match &event {
                ClientEvent::Disconnected(reason) | ClientEvent::Error(reason) => {
                    warn!(from = %t.from, to = %t.to, reason = %reason, "Session state changed");
                }
                _ => info!(from = %t.from, to = %t.to, "Session state changed"),
            },
            None => debug!(?event, state = %session.state(), "Client event ignored"),
        }

        if !session.state().accepts_events() {
            break;
        }
    }
}

fn fail(session: &Session, error: &ClientError) {
    let event = ClientEvent::Error(error.to_string());
    if session.apply(Input::Event(&event), Utc::now()).is_some() {
        warn!(error = %error, "Client connection failed");
    }
}

/// Take the session's handle once no dispatch is using it, then close it.
async fn release_handle(session: &Session, timeout: Duration) -> Result<(), SessionError> {
    let _dispatch = session.lock_dispatch().await;
    match session.take_handle() {
        Some(handle) => close_handle(handle, timeout).await,
        None => Ok(()),
    }
}

async fn close_handle(
    handle: Arc<dyn ClientHandle>,
    timeout: Duration,
) -> Result<(), SessionError> {
    match tokio::time::timeout(timeout, handle.close()).await {
        Ok(Ok(())) => {
            debug!("Client handle closed");
            Ok(())
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Client handle close failed, abandoning it");
            Err(SessionError::Client(e))
        }
        Err(_) => {
            warn!(timeout = ?timeout, "Client handle close timed out, abandoning it");
            crate::metrics::record_close_timeout();
            Err(SessionError::HandleCloseTimeout(timeout))
        }
    }
}
