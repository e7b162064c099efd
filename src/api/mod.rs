//! HTTP control API
//!
//! Lets the backend (or an operator) start, inspect, and stop sessions and
//! send messages through them.

mod handlers;

pub use handlers::{
    HealthResponse, InitializeResponse, SendMessageRequest, SendMessageResponse,
    SessionListResponse,
};

use crate::error::RelayError;
use crate::relay::SessionManager;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Create the HTTP router with all routes configured
pub fn create_router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/sessions/{user_id}",
            get(handlers::get_session)
                .post(handlers::initialize_session)
                .delete(handlers::logout_session),
        )
        .route("/sessions/{user_id}/messages", post(handlers::send_message))
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

/// Error answered by the control API
#[derive(Debug)]
pub enum ApiError {
    Relay(RelayError),
    NotFound(String),
    BadRequest(String),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self::Relay(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Relay(err) => (err.status_code(), err.to_string()),
            Self::NotFound(user_id) => (
                StatusCode::NOT_FOUND,
                format!("no session for {}", user_id),
            ),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        if status.is_server_error() {
            tracing::warn!("API: {} {}", status.as_u16(), message);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
