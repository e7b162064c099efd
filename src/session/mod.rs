//! Session state
//!
//! Per-user session records and the registry that owns them.

mod registry;

pub use registry::SessionRegistry;

use crate::connector::ChatClient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    AwaitingPairing,
    Connected,
    Disconnected,
    AuthFailed,
}

impl SessionState {
    /// Terminal states never stay in the registry
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::AuthFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::AuthFailed => "auth_failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a user's session, returned by `initialize`.
///
/// Two handles are equal only when they refer to the same session instance;
/// a re-created session for the same user gets a new `session_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub user_id: String,
    pub session_id: Uuid,
}

/// One user's session record
#[derive(Clone)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    /// Present only while awaiting pairing
    pub pairing_token: Option<String>,
    pub last_error: Option<String>,
    /// Backend reported a previously paired session at startup
    pub resumed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    client: Option<Arc<dyn ChatClient>>,
    /// Stops the session's event actor
    stop: CancellationToken,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Uninitialized,
            pairing_token: None,
            last_error: None,
            resumed: false,
            created_at: now,
            updated_at: now,
            client: None,
            stop: CancellationToken::new(),
        }
    }

    pub fn handle(&self, user_id: &str) -> SessionHandle {
        SessionHandle {
            user_id: user_id.to_string(),
            session_id: self.id,
        }
    }

    pub fn client(&self) -> Option<Arc<dyn ChatClient>> {
        self.client.clone()
    }

    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Tell the session's actor to stop processing events
    pub(crate) fn stop_actor(&self) {
        self.stop.cancel();
    }

    pub fn set_client(&mut self, client: Arc<dyn ChatClient>) {
        self.client = Some(client);
        self.touch();
    }

    /// Store a new pairing token. Only valid before the session connects;
    /// returns false (and changes nothing) otherwise.
    pub fn mark_awaiting_pairing(&mut self, token: String) -> bool {
        match self.state {
            SessionState::Uninitialized | SessionState::AwaitingPairing => {
                self.state = SessionState::AwaitingPairing;
                self.pairing_token = Some(token);
                self.touch();
                true
            }
            _ => false,
        }
    }

    /// Mark the session ready to send. Returns false (and changes nothing)
    /// once the session has ended.
    pub fn mark_connected(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SessionState::Connected;
        self.pairing_token = None;
        self.last_error = None;
        self.touch();
        true
    }

    /// Move into a terminal state, recording why. Returns false if the
    /// session had already ended, so only one caller tears it down.
    pub fn mark_terminal(&mut self, state: SessionState, reason: Option<String>) -> bool {
        debug_assert!(state.is_terminal());
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        self.pairing_token = None;
        if reason.is_some() {
            self.last_error = reason;
        }
        self.touch();
        true
    }

    pub fn snapshot(&self, user_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            user_id: user_id.to_string(),
            session_id: self.id,
            state: self.state,
            pairing_token: self.pairing_token.clone(),
            last_error: self.last_error.clone(),
            resumed: self.resumed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pairing_token", &self.pairing_token)
            .field("last_error", &self.last_error)
            .field("resumed", &self.resumed)
            .field("has_client", &self.client.is_some())
            .finish()
    }
}

/// Read-only view of a session, as served by the status surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub session_id: Uuid,
    pub state: SessionState,
    pub pairing_token: Option<String>,
    pub last_error: Option<String>,
    pub resumed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
