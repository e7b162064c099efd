//! In-memory session registry keyed by user id.

use super::Session;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Map of user id to session. Constructed explicitly and shared by `Arc`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: &str) -> Option<Session> {
        self.sessions.read().await.get(user_id).cloned()
    }

    /// Insert or replace
    pub async fn put(&self, user_id: &str, session: Session) {
        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), session);
    }

    /// Remove the entry, if any. Idempotent.
    pub async fn remove(&self, user_id: &str) -> Option<Session> {
        self.sessions.write().await.remove(user_id)
    }

    /// Remove the entry only if it is still the session `session_id`.
    /// A newer session for the same user is left alone.
    pub async fn remove_session(&self, user_id: &str, session_id: Uuid) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(user_id) {
            Some(s) if s.id == session_id => sessions.remove(user_id),
            _ => None,
        }
    }

    /// Atomically modify one entry. Returns `None` if the user has no session.
    pub async fn update<R>(&self, user_id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.write().await.get_mut(user_id).map(f)
    }

    /// Snapshot copy of every entry
    pub async fn list_all(&self) -> Vec<(String, Session)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.sessions.read().await.contains_key(user_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
