//! In-process fakes for the connector and backend seams.

use crate::backend::{
    Backend, MessageReply, MessageRequest, PairingNotification, RemoteSession,
    StatusNotification,
};
use crate::connector::{ChatClient, ConnectorError, EventSink, SessionConnector, SessionEvent};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Chat client that records what it was asked to send
#[derive(Default)]
pub struct FakeClient {
    sent: Mutex<Vec<(String, String)>>,
    destroyed: AtomicBool,
    fail_sends: AtomicBool,
    hang_on_destroy: bool,
}

impl FakeClient {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatClient for FakeClient {
    async fn send_text(&self, chat: &str, text: &str) -> std::result::Result<(), ConnectorError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectorError::Send("transport down".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat.to_string(), text.to_string()));
        Ok(())
    }

    async fn destroy(&self) -> std::result::Result<(), ConnectorError> {
        if self.hang_on_destroy {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that hands out [`FakeClient`]s and lets tests inject events
#[derive(Default)]
pub struct FakeConnector {
    fail: bool,
    hang_on_destroy: HashSet<String>,
    /// Emitted from inside `connect`, before the client is returned
    connect_events: Vec<SessionEvent>,
    connects: AtomicUsize,
    sessions: Mutex<HashMap<String, (EventSink, Arc<FakeClient>)>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `connect` fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Clients for `user_id` never finish tearing down
    pub fn hang_on_destroy(mut self, user_id: &str) -> Self {
        self.hang_on_destroy.insert(user_id.to_string());
        self
    }

    /// Emit `events` while `connect` is still running
    pub fn emit_during_connect(mut self, events: Vec<SessionEvent>) -> Self {
        self.connect_events = events;
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Latest client handed out for `user_id`
    pub fn client(&self, user_id: &str) -> Option<Arc<FakeClient>> {
        self.sessions
            .lock()
            .unwrap()
            .get(user_id)
            .map(|(_, c)| c.clone())
    }

    /// Push an event as the library would
    pub async fn emit(&self, user_id: &str, event: SessionEvent) -> bool {
        let sink = self
            .sessions
            .lock()
            .unwrap()
            .get(user_id)
            .map(|(s, _)| s.clone());
        match sink {
            Some(sink) => sink.emit(event).await,
            None => false,
        }
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        user_id: &str,
        events: EventSink,
    ) -> std::result::Result<Arc<dyn ChatClient>, ConnectorError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ConnectorError::Start("browser unavailable".to_string()));
        }
        let client = Arc::new(FakeClient {
            hang_on_destroy: self.hang_on_destroy.contains(user_id),
            ..FakeClient::default()
        });
        self.sessions
            .lock()
            .unwrap()
            .insert(user_id.to_string(), (events.clone(), client.clone()));
        for event in &self.connect_events {
            events.emit(event.clone()).await;
        }
        Ok(client)
    }
}

/// Backend that records every call
#[derive(Default)]
pub struct FakeBackend {
    ready_sessions: HashSet<String>,
    reply: Mutex<Option<String>>,
    fail_messages: AtomicBool,
    pairings: Mutex<Vec<(String, String)>>,
    statuses: Mutex<Vec<(String, bool)>>,
    messages: Mutex<Vec<MessageRequest>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ready_session(mut self, user_id: &str) -> Self {
        self.ready_sessions.insert(user_id.to_string());
        self
    }

    pub fn reply_with(&self, text: &str) {
        *self.reply.lock().unwrap() = Some(text.to_string());
    }

    pub fn fail_messages(&self, fail: bool) {
        self.fail_messages.store(fail, Ordering::SeqCst);
    }

    pub fn pairings(&self) -> Vec<(String, String)> {
        self.pairings.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, bool)> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<MessageRequest> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn lookup_session(&self, user_id: &str) -> Result<Option<RemoteSession>> {
        Ok(self
            .ready_sessions
            .contains(user_id)
            .then(|| RemoteSession {
                ready: true,
                client_id: Some(user_id.to_string()),
            }))
    }

    async fn report_pairing(&self, n: &PairingNotification) -> Result<()> {
        self.pairings
            .lock()
            .unwrap()
            .push((n.user_id.clone(), n.qr_code.clone()));
        Ok(())
    }

    async fn report_status(&self, n: &StatusNotification) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((n.user_id.clone(), n.connected));
        Ok(())
    }

    async fn process_message(&self, request: &MessageRequest) -> Result<MessageReply> {
        self.messages.lock().unwrap().push(request.clone());
        if self.fail_messages.load(Ordering::SeqCst) {
            return Err(RelayError::MessageProcessing("backend down".to_string()));
        }
        Ok(MessageReply {
            reply: self.reply.lock().unwrap().clone(),
        })
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}
