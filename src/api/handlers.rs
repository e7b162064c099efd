//! REST API handlers

use super::ApiError;
use crate::relay::SessionManager;
use crate::session::{SessionSnapshot, SessionState};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Sessions currently held in the registry
    pub sessions: usize,
}

pub async fn health(State(manager): State<Arc<SessionManager>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: manager.registry().len().await,
    })
}

/// Response for listing sessions
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSnapshot>,
}

pub async fn list_sessions(
    State(manager): State<Arc<SessionManager>>,
) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: manager.statuses().await,
    })
}

pub async fn get_session(
    State(manager): State<Arc<SessionManager>>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    manager
        .status(&user_id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound(user_id))
}

/// Returned by `POST /sessions/{user_id}`
#[derive(Debug, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub user_id: String,
    pub session_id: Uuid,
    /// `None` if the session already ended by the time it was read back
    pub state: Option<SessionState>,
}

pub async fn initialize_session(
    State(manager): State<Arc<SessionManager>>,
    Path(user_id): Path<String>,
) -> Result<Json<InitializeResponse>, ApiError> {
    let handle = manager.initialize(&user_id).await?;
    let state = manager
        .status(&user_id)
        .await
        .filter(|s| s.session_id == handle.session_id)
        .map(|s| s.state);

    Ok(Json(InitializeResponse {
        user_id: handle.user_id,
        session_id: handle.session_id,
        state,
    }))
}

pub async fn logout_session(
    State(manager): State<Arc<SessionManager>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    manager.logout(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Body of `POST /sessions/{user_id}/messages`
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Phone number or full chat address
    pub to: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub sent: bool,
}

pub async fn send_message(
    State(manager): State<Arc<SessionManager>>,
    Path(user_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    if request.to.trim().is_empty() {
        return Err(ApiError::BadRequest("recipient is required".to_string()));
    }
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text is required".to_string()));
    }

    let sent = manager
        .send_message(&user_id, &request.to, &request.text)
        .await?;
    Ok(Json(SendMessageResponse { sent }))
}
