//! Session lifecycle and health endpoints.

use super::{ApiError, AppState};
use crate::error::SessionError;
use crate::session::DestroyOutcome;
use crate::state::{SessionSnapshot, SessionState};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Status string for users without a session.
const NO_SESSION: &str = "no_session";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdBody {
    #[serde(default)]
    user_id: Option<String>,
}

/// Pull a non-empty `userId` out of a JSON body.
fn user_id(body: Result<Json<UserIdBody>, JsonRejection>) -> Result<String, ApiError> {
    let Json(body) = body.map_err(|_| ApiError::missing_user_id())?;
    body.user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(ApiError::missing_user_id)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    success: bool,
    status: &'static str,
}

pub async fn start_session(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UserIdBody>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let user_id = user_id(body)?;
    let status = state.manager.create_session(&user_id)?;
    Ok(Json(StatusResponse {
        success: true,
        status: status.as_str(),
    }))
}

pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<StatusResponse> {
    let status = state
        .manager
        .status(&user_id)
        .map_or(NO_SESSION, SessionState::as_str);
    Json(StatusResponse {
        success: true,
        status,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrResponse {
    success: bool,
    qr_code: Option<String>,
    status: &'static str,
}

pub async fn get_qr(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<QrResponse>, ApiError> {
    let session = state
        .manager
        .session(&user_id)
        .ok_or_else(|| ApiError::not_found("QR not available"))?;

    // One snapshot, so state and payload agree.
    let snapshot = session.snapshot();
    let status = snapshot.state.as_str();
    Ok(Json(QrResponse {
        success: true,
        qr_code: qr_from_snapshot(snapshot)?,
        status,
    }))
}

/// `None` once paired, the payload while awaiting a scan, 404 otherwise.
fn qr_from_snapshot(snapshot: SessionSnapshot) -> Result<Option<String>, ApiError> {
    match (snapshot.state, snapshot.qr_payload) {
        (SessionState::Ready, _) => Ok(None),
        (SessionState::AwaitingScan, Some(qr)) => Ok(Some(qr)),
        (state, _) => Err(ApiError::not_found(
            SessionError::NotAvailable { state }.to_string(),
        )),
    }
}

#[derive(Debug, Serialize)]
pub struct CloseResponse {
    success: bool,
    message: &'static str,
}

pub async fn close_session(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UserIdBody>, JsonRejection>,
) -> Result<Json<CloseResponse>, ApiError> {
    let user_id = user_id(body)?;
    let message = match state.manager.destroy_session(&user_id).await {
        DestroyOutcome::Destroyed => {
            info!(user_id = %user_id, "Session closed on request");
            "Session closed"
        }
        DestroyOutcome::HandleAbandoned(e) => {
            warn!(user_id = %user_id, error = %e, "Session closed, client handle abandoned");
            "Session closed"
        }
        DestroyOutcome::AlreadyGone => "No active session",
    };
    Ok(Json(CloseResponse {
        success: true,
        message,
    }))
}

#[derive(Debug, Serialize)]
pub struct MemoryUsage {
    physical: usize,
    r#virtual: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounts {
    live: usize,
    max: usize,
    by_state: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    success: bool,
    status: &'static str,
    /// Seconds since startup.
    uptime: u64,
    memory: Option<MemoryUsage>,
    sessions: SessionCounts,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let registry = state.manager.registry();
    let by_state = registry
        .count_by_state()
        .into_iter()
        .map(|(s, n)| (s.as_str(), n))
        .collect();

    let memory = memory_stats::memory_stats().map(|usage| MemoryUsage {
        physical: usage.physical_mem,
        r#virtual: usage.virtual_mem,
    });

    Json(HealthResponse {
        success: true,
        status: "healthy",
        uptime: state.started.elapsed().as_secs(),
        memory,
        sessions: SessionCounts {
            live: registry.len(),
            max: registry.max_sessions(),
            by_state,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::Utc;

    fn snapshot(state: SessionState, qr_payload: Option<&str>) -> SessionSnapshot {
        SessionSnapshot {
            user_id: "alice".into(),
            state,
            qr_payload: qr_payload.map(str::to_string),
            created_at: Utc::now(),
            last_activity: Utc::now(),
            reason: None,
        }
    }

    #[test]
    fn qr_follows_snapshot_state() {
        assert_eq!(
            qr_from_snapshot(snapshot(SessionState::AwaitingScan, Some("pair-me"))).unwrap(),
            Some("pair-me".to_string())
        );
        assert_eq!(
            qr_from_snapshot(snapshot(SessionState::Ready, None)).unwrap(),
            None
        );
    }

    #[test]
    fn qr_unavailable_outside_scan_and_ready() {
        for state in [
            SessionState::Initializing,
            SessionState::Disconnected,
            SessionState::Failed,
        ] {
            let err = qr_from_snapshot(snapshot(state, None)).unwrap_err();
            assert_eq!(err.status, StatusCode::NOT_FOUND);
        }
    }
}
