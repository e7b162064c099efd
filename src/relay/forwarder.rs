//! Event Forwarder
//!
//! Turns session events into backend calls and chat replies. Every backend
//! notification is best-effort: failures are logged and never undo the state
//! change that triggered them.

use crate::address;
use crate::backend::{Backend, MessageRequest, PairingNotification, StatusNotification};
use crate::connector::{ChatClient, InboundMessage};
use std::sync::Arc;

/// Why an inbound message was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    Broadcast,
    Group,
    OwnMessage,
    Empty,
}

/// What happened to an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Filtered(FilterReason),
    /// Backend answered and the reply was delivered
    Replied,
    /// Backend answered without reply text
    NoReply,
    /// Backend answered but the reply could not be sent
    ReplyFailed,
    /// Backend failed; the apology was delivered
    Apologized,
    /// Backend failed and so did the apology
    Dropped,
}

/// Messages the relay never forwards: the status feed and broadcast lists,
/// group chats, the account's own messages, and empty bodies.
pub fn filter_reason(msg: &InboundMessage) -> Option<FilterReason> {
    if address::is_broadcast(&msg.chat) || address::is_broadcast(&msg.from) {
        Some(FilterReason::Broadcast)
    } else if msg.is_group || address::is_group(&msg.chat) {
        Some(FilterReason::Group)
    } else if msg.from_me {
        Some(FilterReason::OwnMessage)
    } else if msg.body.trim().is_empty() {
        Some(FilterReason::Empty)
    } else {
        None
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

/// Forwards lifecycle events and messages to the backend
pub struct EventForwarder {
    backend: Arc<dyn Backend>,
    apology: String,
}

impl EventForwarder {
    pub fn new(backend: Arc<dyn Backend>, apology: impl Into<String>) -> Self {
        Self {
            backend,
            apology: apology.into(),
        }
    }

    /// Whether the backend remembers a ready session for `user_id`.
    /// Lookup failures count as "no".
    pub async fn previously_ready(&self, user_id: &str) -> bool {
        match self.backend.lookup_session(user_id).await {
            Ok(Some(remote)) => remote.ready,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Backend: session lookup for {} failed: {}", user_id, e);
                false
            }
        }
    }

    pub async fn notify_pairing(&self, user_id: &str, token: &str) {
        let notification = PairingNotification::new(user_id, token);
        if let Err(e) = self.backend.report_pairing(&notification).await {
            tracing::warn!("Backend: pairing notification for {} lost: {}", user_id, e);
        }
    }

    pub async fn notify_status(&self, user_id: &str, connected: bool) {
        let notification = StatusNotification::new(user_id, connected);
        if let Err(e) = self.backend.report_status(&notification).await {
            tracing::warn!(
                "Backend: status notification (connected={}) for {} lost: {}",
                connected,
                user_id,
                e
            );
        }
    }

    /// Filter, forward, and answer one inbound message.
    pub async fn handle_inbound(
        &self,
        user_id: &str,
        session_id: &str,
        msg: &InboundMessage,
        client: &dyn ChatClient,
    ) -> InboundOutcome {
        if let Some(reason) = filter_reason(msg) {
            tracing::debug!(
                "WhatsApp: skipping message in {} for {} ({:?})",
                msg.chat,
                user_id,
                reason
            );
            return InboundOutcome::Filtered(reason);
        }

        tracing::info!(
            "WhatsApp: message from {} for {}: {}",
            msg.from,
            user_id,
            preview(&msg.body)
        );

        let request = MessageRequest::new(user_id, session_id, &msg.from, &msg.body);
        match self.backend.process_message(&request).await {
            Ok(reply) => match reply.text() {
                Some(text) => match client.send_text(&msg.chat, text).await {
                    Ok(()) => InboundOutcome::Replied,
                    Err(e) => {
                        tracing::error!("WhatsApp: failed to send reply to {}: {}", msg.chat, e);
                        InboundOutcome::ReplyFailed
                    }
                },
                None => InboundOutcome::NoReply,
            },
            Err(e) => {
                tracing::error!("Backend: message from {} not processed: {}", msg.from, e);
                match client.send_text(&msg.chat, &self.apology).await {
                    Ok(()) => InboundOutcome::Apologized,
                    Err(e) => {
                        tracing::error!(
                            "WhatsApp: failed to send apology to {}: {}",
                            msg.chat,
                            e
                        );
                        InboundOutcome::Dropped
                    }
                }
            }
        }
    }
}
