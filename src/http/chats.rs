//! Read-only capability endpoints: labels, groups, group participants.

use super::{ApiError, AppState};
use crate::client::ClientHandle;
use crate::error::SessionError;
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use std::sync::Arc;

/// Handle of a `Ready` session, or 400.
fn ready_handle(state: &AppState, user_id: &str) -> Result<Arc<dyn ClientHandle>, ApiError> {
    state.manager.ready_handle(user_id).map_err(|e| match e {
        SessionError::NotFound(_) | SessionError::InvalidState { .. } => {
            ApiError::session_not_ready()
        }
        other => other.into(),
    })
}

#[derive(Debug, Serialize)]
pub struct LabelChats {
    id: String,
    name: String,
    numbers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LabelsResponse {
    success: bool,
    labels: Vec<LabelChats>,
}

pub async fn labels_with_chats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<LabelsResponse>, ApiError> {
    let handle = ready_handle(&state, &user_id)?;

    let mut labels = Vec::new();
    for label in handle.get_labels().await? {
        let chats = handle.get_chats_by_label(&label.id).await?;
        labels.push(LabelChats {
            numbers: chats.iter().map(|c| c.user().to_string()).collect(),
            id: label.id,
            name: label.name,
        });
    }
    Ok(Json(LabelsResponse {
        success: true,
        labels,
    }))
}

#[derive(Debug, Serialize)]
pub struct GroupSummary {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
pub struct GroupsResponse {
    success: bool,
    groups: Vec<GroupSummary>,
}

pub async fn groups(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<GroupsResponse>, ApiError> {
    let handle = ready_handle(&state, &user_id)?;
    let groups = handle
        .get_chats()
        .await?
        .into_iter()
        .filter(|c| c.is_group)
        .map(|c| GroupSummary {
            id: c.id,
            name: c.name,
        })
        .collect();
    Ok(Json(GroupsResponse {
        success: true,
        groups,
    }))
}

#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    success: bool,
    numbers: Vec<String>,
}

pub async fn group_participants(
    State(state): State<Arc<AppState>>,
    Path((user_id, group_id)): Path<(String, String)>,
) -> Result<Json<ParticipantsResponse>, ApiError> {
    let handle = ready_handle(&state, &user_id)?;
    let numbers = handle
        .get_participants(&group_id)
        .await?
        .into_iter()
        .map(|p| {
            p.split_once('@')
                .map_or(p.clone(), |(user, _)| user.to_string())
        })
        .collect();
    Ok(Json(ParticipantsResponse {
        success: true,
        numbers,
    }))
}
