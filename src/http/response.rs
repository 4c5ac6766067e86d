//! JSON error responses.
//!
//! Every failure leaves the API as `{"success": false, "error": "..."}`
//! with a status code chosen from the typed error. Client handle internals
//! are reduced to their display text.

use crate::error::{ClientError, DispatchError, SessionError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn missing_user_id() -> Self {
        Self::bad_request("Missing userId")
    }

    pub fn session_not_ready() -> Self {
        Self::bad_request("Session not ready")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

impl From<ClientError> for ApiError {
    fn from(e: ClientError) -> Self {
        let status = match e {
            ClientError::ChatNotFound(_) | ClientError::NotAGroup(_) => StatusCode::NOT_FOUND,
            ClientError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let status = match &e {
            SessionError::NotFound(_) | SessionError::NotAvailable { .. } => StatusCode::NOT_FOUND,
            SessionError::InvalidState { .. } => StatusCode::BAD_REQUEST,
            SessionError::Client(inner) => return Self::from(inner.clone()),
            SessionError::CapacityExceeded { .. } | SessionError::HandleCloseTimeout(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        Self::bad_request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionState;

    #[test]
    fn session_errors_map_to_statuses() {
        let cases = [
            (SessionError::NotFound("u".into()), StatusCode::NOT_FOUND),
            (
                SessionError::CapacityExceeded { max: 1 },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                SessionError::NotAvailable {
                    state: SessionState::Failed,
                },
                StatusCode::NOT_FOUND,
            ),
            (
                SessionError::Client(ClientError::NotAGroup("g".into())),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn dispatch_errors_are_bad_requests() {
        let err = ApiError::from(DispatchError::SessionNotReady {
            state: SessionState::AwaitingScan,
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "session not ready (state: awaiting_scan)");
    }
}
