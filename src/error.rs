//! Unified error handling for relayd.
//!
//! This module provides the error hierarchy for the session core, with
//! static error codes used for metric labels and JSON error bodies.

use crate::state::{SessionState, UserId};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Client Errors (external messaging client)
// ============================================================================

/// Errors reported by a client handle or client factory.
///
/// These never leave the core as-is: the HTTP adapter only ever sees their
/// display text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("chat not found: {0}")]
    ChatNotFound(String),

    #[error("chat {0} is not a group")]
    NotAGroup(String),

    #[error("client closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("client error: {0}")]
    Other(String),
}

impl ClientError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect_failed",
            Self::Send(_) => "remote_send_failure",
            Self::ChatNotFound(_) => "chat_not_found",
            Self::NotAGroup(_) => "not_a_group",
            Self::Closed => "client_closed",
            Self::Timeout(_) => "timeout",
            Self::InvalidAddress(_) => "invalid_address",
            Self::Other(_) => "client_error",
        }
    }
}

// ============================================================================
// Session Errors (lifecycle controller / registry)
// ============================================================================

/// Errors surfaced by session lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no session for user {0}")]
    NotFound(UserId),

    #[error("session capacity exceeded (max {max})")]
    CapacityExceeded { max: usize },

    /// Operation attempted against the wrong lifecycle state.
    #[error("session {user_id} is {state}")]
    InvalidState { user_id: UserId, state: SessionState },

    /// The QR payload is not available in the current state.
    ///
    /// Distinct from `NotFound`: `Ready` sessions answer with this to signal
    /// that no further scan is needed.
    #[error("qr code not available (session is {state})")]
    NotAvailable { state: SessionState },

    #[error("handle close timed out after {0:?}")]
    HandleCloseTimeout(Duration),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl SessionError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotAvailable { .. } => "not_available",
            Self::HandleCloseTimeout(_) => "handle_close_timeout",
            Self::Client(e) => e.error_code(),
        }
    }
}

// ============================================================================
// Dispatch Errors (job-level)
// ============================================================================

/// Job-level dispatch failures.
///
/// Per-recipient send failures are not errors at this level: they are
/// retried and recorded in the report. These variants mean nothing was sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no session for user {0}")]
    NotFound(UserId),

    #[error("session not ready (state: {state})")]
    SessionNotReady { state: SessionState },

    #[error("no recipients")]
    NoRecipients,
}

impl DispatchError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::SessionNotReady { .. } => "invalid_state",
            Self::NoRecipients => "no_recipients",
        }
    }
}
