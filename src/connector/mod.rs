//! Session Connectors
//!
//! The seam between the relay and whatever library actually speaks WhatsApp.
//! A connector starts one session per user, pushes that session's lifecycle
//! events into an [`EventSink`], and hands back a [`ChatClient`] for sending.

#[cfg(feature = "whatsapp")]
mod whatsapp;

#[cfg(feature = "whatsapp")]
pub use whatsapp::WhatsAppConnector;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by connectors and chat clients
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("session could not start: {0}")]
    Start(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("teardown failed: {0}")]
    Teardown(String),
}

/// A chat message received by a session
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Chat the message arrived in; replies go here
    pub chat: String,
    /// Author address
    pub from: String,
    pub body: String,
    /// Sent by the paired account itself
    pub from_me: bool,
    pub is_group: bool,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// One-to-one text message from someone else, stamped now
    pub fn direct(from: impl Into<String>, body: impl Into<String>) -> Self {
        let from = from.into();
        Self {
            chat: from.clone(),
            from,
            body: body.into(),
            from_me: false,
            is_group: false,
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle events emitted by a running session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A new pairing token (QR payload) is available
    PairingToken(String),
    /// Session is authenticated and can send
    Ready,
    Authenticated,
    AuthFailure(String),
    Disconnected(String),
    Message(InboundMessage),
}

impl SessionEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PairingToken(_) => "pairing-token",
            Self::Ready => "ready",
            Self::Authenticated => "authenticated",
            Self::AuthFailure(_) => "auth-failure",
            Self::Disconnected(_) => "disconnected",
            Self::Message(_) => "message",
        }
    }
}

/// Ordered channel into one session's actor.
#[derive(Clone)]
pub struct EventSink {
    user_id: Arc<str>,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(user_id: &str, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            user_id: Arc::from(user_id),
            tx,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue an event. Returns false once the session actor has stopped.
    pub async fn emit(&self, event: SessionEvent) -> bool {
        let kind = event.kind();
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(
                    "WhatsApp: dropping {} event for {}, session closed",
                    kind,
                    self.user_id
                );
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Send/teardown capability of a started session.
///
/// Chat addresses use WhatsApp Web form (`<digits>@c.us`); clients translate
/// to their native addressing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_text(&self, chat: &str, text: &str) -> Result<(), ConnectorError>;

    /// Log out and release the session's resources
    async fn destroy(&self) -> Result<(), ConnectorError>;
}

/// Starts sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Begin establishing a session for `user_id`. Returns as soon as the
    /// session is running; pairing and readiness arrive later on `events`.
    async fn connect(
        &self,
        user_id: &str,
        events: EventSink,
    ) -> Result<Arc<dyn ChatClient>, ConnectorError>;
}
