//! Backend Collaborator Client
//!
//! HTTP client for the business backend: session lookup, pairing and state
//! notifications, and message processing.

mod types;

pub use types::{
    MessageReply, MessageRequest, PairingNotification, RemoteSession, SessionLookup,
    StatusNotification,
};

use crate::config::BackendConfig;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use serde::Serialize;

/// Operations the relay needs from the backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Previously saved session state for `user_id`, if the backend has one
    async fn lookup_session(&self, user_id: &str) -> Result<Option<RemoteSession>>;

    async fn report_pairing(&self, notification: &PairingNotification) -> Result<()>;

    async fn report_status(&self, notification: &StatusNotification) -> Result<()>;

    /// Hand an inbound message to the backend and wait for its reply
    async fn process_message(&self, request: &MessageRequest) -> Result<MessageReply>;
}

/// `reqwest`-based backend client. Every request is bounded by the
/// configured timeout.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RelayError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn post_json<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let url = self.config.url(path);
        self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map(|_| ())
            .map_err(|e| RelayError::NotificationDelivery {
                endpoint: url,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn lookup_session(&self, user_id: &str) -> Result<Option<RemoteSession>> {
        let url = self.config.url(&self.config.session_path);
        let delivery_err = |e: reqwest::Error| RelayError::NotificationDelivery {
            endpoint: url.clone(),
            reason: e.to_string(),
        };

        let lookup: SessionLookup = self
            .client
            .get(&url)
            .query(&[("user_id", user_id)])
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(delivery_err)?
            .json()
            .await
            .map_err(delivery_err)?;

        Ok(lookup.session)
    }

    async fn report_pairing(&self, notification: &PairingNotification) -> Result<()> {
        self.post_json(&self.config.pairing_path, notification).await
    }

    async fn report_status(&self, notification: &StatusNotification) -> Result<()> {
        self.post_json(&self.config.status_path, notification).await
    }

    async fn process_message(&self, request: &MessageRequest) -> Result<MessageReply> {
        let url = self.config.url(&self.config.message_path);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::MessageProcessing(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RelayError::MessageProcessing(format!(
                "{} returned {}",
                url, status
            )));
        }

        // An empty or non-JSON body just means "no reply"
        let body = resp
            .text()
            .await
            .map_err(|e| RelayError::MessageProcessing(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(MessageReply::default());
        }
        match serde_json::from_str(&body) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::warn!("Backend: unparseable reply from {}: {}", url, e);
                Ok(MessageReply::default())
            }
        }
    }
}
