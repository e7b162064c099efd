use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// New pairing token for a user's session
#[derive(Debug, Clone, Serialize)]
pub struct PairingNotification {
    pub user_id: String,
    /// Raw QR payload, rendered by the frontend
    pub qr_code: String,
    pub timestamp: DateTime<Utc>,
}

impl PairingNotification {
    pub fn new(user_id: &str, token: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            qr_code: token.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Session connected/disconnected.
///
/// `ready` and `client_id` keep the payload readable by backends that store
/// sessions keyed by client id.
#[derive(Debug, Clone, Serialize)]
pub struct StatusNotification {
    pub user_id: String,
    pub client_id: String,
    pub ready: bool,
    pub connected: bool,
    pub timestamp: DateTime<Utc>,
}

impl StatusNotification {
    pub fn new(user_id: &str, connected: bool) -> Self {
        Self {
            user_id: user_id.to_string(),
            client_id: user_id.to_string(),
            ready: connected,
            connected,
            timestamp: Utc::now(),
        }
    }
}

/// Inbound chat message forwarded for processing
#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest {
    pub user_id: String,
    pub session_id: String,
    pub from: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageRequest {
    pub fn new(user_id: &str, session_id: &str, from: &str, message: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            from: from.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Backend answer to a forwarded message. Other fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageReply {
    #[serde(default, alias = "bot_message")]
    pub reply: Option<String>,
}

impl MessageReply {
    /// Reply text, if there is anything worth sending
    pub fn text(&self) -> Option<&str> {
        self.reply.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Response of the session lookup endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct SessionLookup {
    #[serde(default)]
    pub session: Option<RemoteSession>,
}

/// Session state as the backend last saw it
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSession {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub client_id: Option<String>,
}
