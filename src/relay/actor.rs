//! Per-session event actor
//!
//! One task per session drains that session's event queue in order, so state
//! transitions and message handling for a user never interleave.

use super::forwarder::EventForwarder;
use crate::address::{self, USER_DOMAIN};
use crate::connector::{ChatClient, InboundMessage, SessionEvent};
use crate::session::{Session, SessionRegistry, SessionState};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub(super) struct SessionActor {
    pub(super) user_id: String,
    pub(super) session_id: Uuid,
    pub(super) registry: Arc<SessionRegistry>,
    pub(super) forwarder: Arc<EventForwarder>,
    pub(super) admin_phone: Option<String>,
    pub(super) teardown_timeout: Duration,
    pub(super) stop: CancellationToken,
    pub(super) events: mpsc::Receiver<SessionEvent>,
}

impl SessionActor {
    /// Spawn the actor. Events stay queued until the session's client is sent
    /// on the returned channel; dropping the sender stops the actor.
    pub(super) fn spawn(self) -> oneshot::Sender<Arc<dyn ChatClient>> {
        let (tx, attached) = oneshot::channel();
        tokio::spawn(self.run(attached));
        tx
    }

    async fn run(mut self, attached: oneshot::Receiver<Arc<dyn ChatClient>>) {
        let client = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return,
            attached = attached => match attached {
                Ok(client) => client,
                Err(_) => {
                    tracing::debug!("WhatsApp: session for {} never attached", self.user_id);
                    return;
                }
            },
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            tracing::debug!("WhatsApp: {} event for {}", event.kind(), self.user_id);
            if self.handle(event, client.as_ref()).await.is_break() {
                break;
            }
        }
        tracing::debug!("WhatsApp: event actor for {} stopped", self.user_id);
    }

    async fn handle(&mut self, event: SessionEvent, client: &dyn ChatClient) -> ControlFlow<()> {
        match event {
            SessionEvent::PairingToken(token) => {
                let Some(stored) = self
                    .with_current(|s| s.mark_awaiting_pairing(token.clone()))
                    .await
                else {
                    return ControlFlow::Break(());
                };
                if stored {
                    tracing::info!("WhatsApp: pairing code issued for {}", self.user_id);
                    self.forwarder.notify_pairing(&self.user_id, &token).await;
                } else {
                    tracing::warn!(
                        "WhatsApp: ignoring pairing code for {}, session already past pairing",
                        self.user_id
                    );
                }
            }
            SessionEvent::Ready => {
                let Some(connected) = self.with_current(Session::mark_connected).await else {
                    return ControlFlow::Break(());
                };
                if !connected {
                    tracing::debug!(
                        "WhatsApp: ignoring ready for {}, session is ending",
                        self.user_id
                    );
                    return ControlFlow::Break(());
                }
                tracing::info!("WhatsApp: session for {} connected", self.user_id);
                self.forwarder.notify_status(&self.user_id, true).await;
                self.notify_admin(client).await;
            }
            SessionEvent::Authenticated => {
                if self.current().await.is_none() {
                    return ControlFlow::Break(());
                }
                tracing::info!("WhatsApp: session for {} authenticated", self.user_id);
            }
            SessionEvent::AuthFailure(reason) => {
                tracing::error!(
                    "WhatsApp: authentication failed for {}: {}",
                    self.user_id,
                    reason
                );
                self.terminate(SessionState::AuthFailed, reason, client).await;
                return ControlFlow::Break(());
            }
            SessionEvent::Disconnected(reason) => {
                tracing::warn!("WhatsApp: session for {} disconnected: {}", self.user_id, reason);
                self.terminate(SessionState::Disconnected, reason, client).await;
                return ControlFlow::Break(());
            }
            SessionEvent::Message(msg) => return self.on_message(msg, client).await,
        }
        ControlFlow::Continue(())
    }

    /// Apply `f` to this actor's session. `None` when the registry no longer
    /// holds this session (logged out or replaced).
    async fn with_current<R>(&self, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let session_id = self.session_id;
        let result = self
            .registry
            .update(&self.user_id, |s| (s.id == session_id).then(|| f(s)))
            .await
            .flatten();
        if result.is_none() {
            tracing::debug!("WhatsApp: session {} for {} is gone", session_id, self.user_id);
        }
        result
    }

    async fn current(&self) -> Option<Session> {
        self.registry
            .get(&self.user_id)
            .await
            .filter(|s| s.id == self.session_id)
    }

    async fn terminate(&self, state: SessionState, reason: String, client: &dyn ChatClient) {
        let claimed = self
            .with_current(|s| s.mark_terminal(state, Some(reason)))
            .await
            .unwrap_or(false);
        if !claimed {
            // Logout or shutdown already claimed it
            return;
        }
        self.forwarder.notify_status(&self.user_id, false).await;

        match tokio::time::timeout(self.teardown_timeout, client.destroy()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("WhatsApp: teardown for {} failed: {}", self.user_id, e),
            Err(_) => tracing::warn!("WhatsApp: teardown for {} timed out", self.user_id),
        }
        self.registry
            .remove_session(&self.user_id, self.session_id)
            .await;
        tracing::info!("WhatsApp: session for {} ended ({})", self.user_id, state);
    }

    async fn on_message(&self, msg: InboundMessage, client: &dyn ChatClient) -> ControlFlow<()> {
        if self.current().await.is_none() {
            return ControlFlow::Break(());
        }

        let outcome = self
            .forwarder
            .handle_inbound(&self.user_id, &self.session_id.to_string(), &msg, client)
            .await;
        tracing::debug!("WhatsApp: message for {} -> {:?}", self.user_id, outcome);
        ControlFlow::Continue(())
    }

    async fn notify_admin(&self, client: &dyn ChatClient) {
        let Some(phone) = &self.admin_phone else {
            return;
        };

        let chat = address::normalize_recipient(phone, USER_DOMAIN);
        let text = format!("✅ WhatsApp session for {} is online", self.user_id);
        if let Err(e) = client.send_text(&chat, &text).await {
            tracing::warn!("WhatsApp: admin notice for {} failed: {}", self.user_id, e);
        }
    }
}
