//! Session Manager
//!
//! Lifecycle controller for per-user sessions: creates them through a
//! [`SessionConnector`], drives each one with an event actor, and exposes
//! logout, outbound sending, status queries, and shutdown.

mod actor;
mod forwarder;

pub use forwarder::{EventForwarder, FilterReason, InboundOutcome, filter_reason};

use crate::address::{self, USER_DOMAIN};
use crate::backend::Backend;
use crate::config::RelayConfig;
use crate::connector::{EventSink, SessionConnector};
use crate::error::{RelayError, Result};
use crate::session::{
    Session, SessionHandle, SessionRegistry, SessionSnapshot, SessionState,
};
use actor::SessionActor;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};

/// Tunables taken from configuration
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub admin_phone: Option<String>,
    pub event_queue: usize,
    /// Bound on each session teardown
    pub teardown_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            admin_phone: None,
            event_queue: 64,
            teardown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&RelayConfig> for ManagerSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            admin_phone: config.admin_phone.clone(),
            event_queue: config.sessions.event_queue.max(1),
            teardown_timeout: config.sessions.shutdown_timeout(),
        }
    }
}

/// A session that did not tear down cleanly during shutdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownFailure {
    pub user_id: String,
    pub reason: String,
}

/// Result of [`SessionManager::shutdown`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub closed: usize,
    pub failures: Vec<ShutdownFailure>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

type UserLocks = std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Holds one user's initialize/logout lock. The map entry is dropped with
/// the last holder.
struct UserLockGuard<'a> {
    locks: &'a UserLocks,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}

/// Owns every user's session
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn SessionConnector>,
    forwarder: Arc<EventForwarder>,
    settings: ManagerSettings,
    /// Serializes initialize/logout per user; only users with a caller in
    /// flight have an entry
    user_locks: UserLocks,
}

impl SessionManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn SessionConnector>,
        backend: Arc<dyn Backend>,
        apology: impl Into<String>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            registry,
            connector,
            forwarder: Arc::new(EventForwarder::new(backend, apology)),
            settings,
            user_locks: UserLocks::default(),
        }
    }

    /// Build from configuration with a fresh registry
    pub fn from_config(
        config: &RelayConfig,
        connector: Arc<dyn SessionConnector>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self::new(
            Arc::new(SessionRegistry::new()),
            connector,
            backend,
            config.sessions.apology_message.clone(),
            ManagerSettings::from(config),
        )
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    async fn lock_user(&self, user_id: &str) -> UserLockGuard<'_> {
        let lock = self
            .user_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id.to_string())
            .or_default()
            .clone();
        UserLockGuard {
            locks: &self.user_locks,
            user_id: user_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn user_lock_count(&self) -> usize {
        self.user_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Start a session for `user_id`, or return the live one.
    pub async fn initialize(&self, user_id: &str) -> Result<SessionHandle> {
        let _guard = self.lock_user(user_id).await;

        if let Some(existing) = self.registry.get(user_id).await
            && !existing.state.is_terminal()
        {
            tracing::debug!(
                "WhatsApp: session for {} already {}, reusing",
                user_id,
                existing.state
            );
            return Ok(existing.handle(user_id));
        }

        self.create_session(user_id).await
    }

    async fn create_session(&self, user_id: &str) -> Result<SessionHandle> {
        let mut session = Session::new();
        session.resumed = self.forwarder.previously_ready(user_id).await;
        let handle = session.handle(user_id);

        let (tx, rx) = mpsc::channel(self.settings.event_queue);
        let stop = session.stop_token();
        self.registry.put(user_id, session).await;

        let attach = SessionActor {
            user_id: user_id.to_string(),
            session_id: handle.session_id,
            registry: self.registry.clone(),
            forwarder: self.forwarder.clone(),
            admin_phone: self.settings.admin_phone.clone(),
            teardown_timeout: self.settings.teardown_timeout,
            stop: stop.clone(),
            events: rx,
        }
        .spawn();

        tracing::info!("WhatsApp: starting session for {}", user_id);
        let client = match self.connector.connect(user_id, EventSink::new(user_id, tx)).await {
            Ok(client) => client,
            Err(e) => {
                stop.cancel();
                self.registry
                    .remove_session(user_id, handle.session_id)
                    .await;
                tracing::error!("WhatsApp: failed to start session for {}: {}", user_id, e);
                return Err(RelayError::Initialization {
                    user_id: user_id.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let session_id = handle.session_id;
        let attached = self
            .registry
            .update(user_id, |s| {
                (s.id == session_id)
                    .then(|| s.set_client(client.clone()))
                    .is_some()
            })
            .await
            .unwrap_or(false);

        if !attached {
            // The session failed or was logged out while it was starting
            if let Err(e) = client.destroy().await {
                tracing::warn!("WhatsApp: teardown for {} failed: {}", user_id, e);
            }
            return Err(RelayError::Initialization {
                user_id: user_id.to_string(),
                reason: "session ended during startup".to_string(),
            });
        }

        // Queued events start flowing once the actor holds the client
        if attach.send(client).is_err() {
            tracing::debug!("WhatsApp: event actor for {} already stopped", user_id);
        }
        Ok(handle)
    }

    /// Tear down and forget the session for `user_id`. No-op when absent.
    pub async fn logout(&self, user_id: &str) -> Result<()> {
        let _guard = self.lock_user(user_id).await;

        let claimed = self
            .registry
            .update(user_id, |s| {
                s.mark_terminal(SessionState::Disconnected, Some("logged out".to_string()))
                    .then(|| s.clone())
            })
            .await
            .flatten();
        let Some(session) = claimed else {
            tracing::debug!("WhatsApp: logout for {} without a live session", user_id);
            return Ok(());
        };

        session.stop_actor();
        if let Some(client) = session.client() {
            match tokio::time::timeout(self.settings.teardown_timeout, client.destroy()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("WhatsApp: teardown for {} failed: {}", user_id, e),
                Err(_) => tracing::warn!("WhatsApp: teardown for {} timed out", user_id),
            }
        }

        self.registry.remove_session(user_id, session.id).await;
        self.forwarder.notify_status(user_id, false).await;
        tracing::info!("WhatsApp: logged out {}", user_id);
        Ok(())
    }

    /// Send `text` to `recipient` through `user_id`'s session.
    ///
    /// Errors with `NotConnected` unless the session is connected. Transport
    /// failures are reported as `Ok(false)`.
    pub async fn send_message(&self, user_id: &str, recipient: &str, text: &str) -> Result<bool> {
        let client = self
            .registry
            .get(user_id)
            .await
            .filter(|s| s.state == SessionState::Connected)
            .and_then(|s| s.client())
            .ok_or_else(|| RelayError::NotConnected(user_id.to_string()))?;

        let chat = address::normalize_recipient(recipient, USER_DOMAIN);
        match client.send_text(&chat, text).await {
            Ok(()) => {
                tracing::debug!("WhatsApp: sent message to {} via {}", chat, user_id);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("WhatsApp: send to {} via {} failed: {}", chat, user_id, e);
                Ok(false)
            }
        }
    }

    pub async fn status(&self, user_id: &str) -> Option<SessionSnapshot> {
        self.registry
            .get(user_id)
            .await
            .map(|s| s.snapshot(user_id))
    }

    /// Every session, ordered by user id
    pub async fn statuses(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<_> = self
            .registry
            .list_all()
            .await
            .into_iter()
            .map(|(user_id, s)| s.snapshot(&user_id))
            .collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }

    /// Tear down every session, each bounded by the teardown timeout.
    pub async fn shutdown(&self) -> ShutdownReport {
        let sessions = self.registry.list_all().await;
        tracing::info!("WhatsApp: shutting down {} session(s)", sessions.len());

        let timeout = self.settings.teardown_timeout;
        let results = futures::future::join_all(sessions.into_iter().map(
            |(user_id, session)| async move {
                let session_id = session.id;
                let claimed = self
                    .registry
                    .update(&user_id, |s| {
                        (s.id == session_id
                            && s.mark_terminal(
                                SessionState::Disconnected,
                                Some("shutdown".to_string()),
                            ))
                        .then(|| s.clone())
                    })
                    .await
                    .flatten();
                let Some(session) = claimed else {
                    // Already ending on its own
                    return None;
                };

                session.stop_actor();
                let outcome = match session.client() {
                    Some(client) => match tokio::time::timeout(timeout, client.destroy()).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("teardown timed out after {:?}", timeout)),
                    },
                    None => Ok(()),
                };
                self.registry.remove_session(&user_id, session_id).await;
                self.forwarder.notify_status(&user_id, false).await;
                Some((user_id, outcome))
            },
        ))
        .await;

        let mut report = ShutdownReport::default();
        for (user_id, outcome) in results.into_iter().flatten() {
            match outcome {
                Ok(()) => report.closed += 1,
                Err(reason) => {
                    tracing::warn!("WhatsApp: shutdown of {} failed: {}", user_id, reason);
                    report.failures.push(ShutdownFailure { user_id, reason });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{FakeBackend, FakeConnector};

    fn manager(connector: Arc<FakeConnector>, backend: Arc<FakeBackend>) -> SessionManager {
        SessionManager::new(
            Arc::new(SessionRegistry::new()),
            connector,
            backend,
            "sorry",
            ManagerSettings {
                teardown_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let connector = Arc::new(FakeConnector::new());
        let mgr = manager(connector.clone(), Arc::new(FakeBackend::new()));

        let first = mgr.initialize("u1").await.unwrap();
        let second = mgr.initialize("u1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mgr.registry().len().await, 1);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_creates_one_session() {
        let connector = Arc::new(FakeConnector::new());
        let mgr = Arc::new(manager(connector.clone(), Arc::new(FakeBackend::new())));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.initialize("u1").await.unwrap() })
            })
            .collect();
        let handles: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(handles.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_initialize_failure_removes_entry() {
        let connector = Arc::new(FakeConnector::failing());
        let mgr = manager(connector, Arc::new(FakeBackend::new()));

        let result = mgr.initialize("u1").await;
        assert!(matches!(result, Err(RelayError::Initialization { .. })));
        assert!(mgr.status("u1").await.is_none());
    }

    #[tokio::test]
    async fn test_initialize_records_backend_resume_hint() {
        let backend = Arc::new(FakeBackend::new().with_ready_session("u1"));
        let mgr = manager(Arc::new(FakeConnector::new()), backend);

        mgr.initialize("u1").await.unwrap();
        mgr.initialize("u2").await.unwrap();

        assert!(mgr.status("u1").await.unwrap().resumed);
        assert!(!mgr.status("u2").await.unwrap().resumed);
    }

    #[tokio::test]
    async fn test_send_requires_connected_session() {
        let connector = Arc::new(FakeConnector::new());
        let mgr = manager(connector.clone(), Arc::new(FakeBackend::new()));

        let missing = mgr.send_message("u1", "5511999", "hi").await;
        assert!(matches!(missing, Err(RelayError::NotConnected(_))));

        mgr.initialize("u1").await.unwrap();
        let pending = mgr.send_message("u1", "5511999", "hi").await;
        assert!(matches!(pending, Err(RelayError::NotConnected(_))));
        assert!(connector.client("u1").unwrap().sent().is_empty());
    }

    #[tokio::test]
    async fn test_logout_absent_user_is_noop() {
        let backend = Arc::new(FakeBackend::new());
        let mgr = manager(Arc::new(FakeConnector::new()), backend.clone());
        mgr.initialize("u2").await.unwrap();

        mgr.logout("u1").await.unwrap();

        assert_eq!(mgr.registry().len().await, 1);
        assert!(backend.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_logout_tears_down_and_notifies() {
        let connector = Arc::new(FakeConnector::new());
        let backend = Arc::new(FakeBackend::new());
        let mgr = manager(connector.clone(), backend.clone());
        mgr.initialize("u1").await.unwrap();

        mgr.logout("u1").await.unwrap();

        assert!(mgr.status("u1").await.is_none());
        assert!(connector.client("u1").unwrap().destroyed());
        assert_eq!(backend.statuses(), vec![("u1".to_string(), false)]);
    }

    #[tokio::test]
    async fn test_shutdown_collects_failures() {
        let connector = Arc::new(FakeConnector::new().hang_on_destroy("slow"));
        let mgr = manager(connector, Arc::new(FakeBackend::new()));
        mgr.initialize("fast").await.unwrap();
        mgr.initialize("slow").await.unwrap();

        let report = mgr.shutdown().await;

        assert_eq!(report.closed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].user_id, "slow");
        assert!(!report.is_clean());
        assert!(mgr.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_user_locks_do_not_accumulate() {
        let mgr = Arc::new(manager(
            Arc::new(FakeConnector::new()),
            Arc::new(FakeBackend::new()),
        ));

        for i in 0..1000 {
            mgr.logout(&format!("ghost{}", i)).await.unwrap();
        }
        assert_eq!(mgr.user_lock_count(), 0);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let mgr = mgr.clone();
                tokio::spawn(async move {
                    mgr.initialize("u1").await.unwrap();
                    if i % 2 == 0 {
                        mgr.logout("u1").await.unwrap();
                    }
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }
        assert_eq!(mgr.user_lock_count(), 0);
        assert!(mgr.registry().len().await <= 1);
    }

    #[tokio::test]
    async fn test_statuses_sorted() {
        let mgr = manager(Arc::new(FakeConnector::new()), Arc::new(FakeBackend::new()));
        mgr.initialize("b").await.unwrap();
        mgr.initialize("a").await.unwrap();

        let users: Vec<_> = mgr.statuses().await.into_iter().map(|s| s.user_id).collect();
        assert_eq!(users, vec!["a", "b"]);
    }
}
