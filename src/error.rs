//! Relay error types

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors surfaced by the session manager and its collaborators.
///
/// Only `Initialization` and `NotConnected` reach callers of the public
/// operations. The delivery and processing variants are logged where they
/// happen and never abort the event that produced them.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The external session-establishment procedure could not start
    #[error("failed to initialize session for {user_id}: {reason}")]
    Initialization { user_id: String, reason: String },

    /// A send was attempted on a session that is not connected
    #[error("session for {0} is not connected")]
    NotConnected(String),

    /// A best-effort backend notification could not be delivered
    #[error("notification to {endpoint} failed: {reason}")]
    NotificationDelivery { endpoint: String, reason: String },

    /// The backend could not process an inbound message
    #[error("backend failed to process message: {0}")]
    MessageProcessing(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// HTTP status the control API answers with for this error.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Initialization { .. } => StatusCode::BAD_GATEWAY,
            Self::NotConnected(_) => StatusCode::CONFLICT,
            Self::NotificationDelivery { .. } | Self::MessageProcessing(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RelayError::Initialization {
            user_id: "u1".to_string(),
            reason: "no browser".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to initialize session for u1: no browser"
        );
        assert_eq!(
            RelayError::NotConnected("u1".to_string()).to_string(),
            "session for u1 is not connected"
        );
    }

    #[test]
    fn test_status_codes() {
        use axum::http::StatusCode;
        assert_eq!(
            RelayError::NotConnected("u1".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            RelayError::Config("bad".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
