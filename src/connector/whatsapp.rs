//! WhatsApp Web connector
//!
//! One `whatsapp-rust` bot per user, each with its own pairing store under
//! `<data_dir>/<user_id>/session.db`. Already-paired users reconnect without
//! a new QR code.

use super::{ChatClient, ConnectorError, EventSink, InboundMessage, SessionConnector, SessionEvent};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use wacore::types::events::Event;
use wacore_binary::jid::Jid;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust::store::SqliteStore;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

const NATIVE_USER_DOMAIN: &str = "@s.whatsapp.net";
const WEB_USER_DOMAIN: &str = "@c.us";

/// Starts WhatsApp Web sessions backed by `whatsapp-rust`
pub struct WhatsAppConnector {
    data_dir: PathBuf,
    render_qr: bool,
}

impl WhatsAppConnector {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            render_qr: false,
        }
    }

    /// Also print each pairing QR to the debug log
    pub fn with_qr_rendering(mut self, enabled: bool) -> Self {
        self.render_qr = enabled;
        self
    }

    fn store_path(&self, user_id: &str) -> PathBuf {
        let dir: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.data_dir.join(dir).join("session.db")
    }
}

#[async_trait]
impl SessionConnector for WhatsAppConnector {
    async fn connect(
        &self,
        user_id: &str,
        events: EventSink,
    ) -> Result<Arc<dyn ChatClient>, ConnectorError> {
        let db_path = self.store_path(user_id);
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ConnectorError::Start(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let backend = SqliteStore::new(db_path.to_string_lossy().as_ref())
            .await
            .map(Arc::new)
            .map_err(|e| ConnectorError::Start(format!("session store: {}", e)))?;

        let render_qr = self.render_qr;
        let mut bot = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .on_event(move |event, _client| {
                let sink = events.clone();
                async move {
                    if let Some(event) = translate(event, render_qr) {
                        sink.emit(event).await;
                    }
                }
            })
            .build()
            .await
            .map_err(|e| ConnectorError::Start(e.to_string()))?;

        let client = bot.client();
        let task = bot
            .run()
            .await
            .map_err(|e| ConnectorError::Start(e.to_string()))?;

        tracing::info!("WhatsApp: bot started for {}", user_id);
        Ok(Arc::new(WhatsAppClient {
            client,
            task: Mutex::new(Some(task)),
        }))
    }
}

/// Map a library event onto the relay's lifecycle events.
fn translate(event: Event, render_qr: bool) -> Option<SessionEvent> {
    match event {
        Event::PairingQrCode { code, .. } => {
            if render_qr && let Ok(qr) = qrcode::QrCode::new(code.as_bytes()) {
                let art = qr
                    .render::<qrcode::render::unicode::Dense1x2>()
                    .build();
                tracing::debug!("WhatsApp QR:\n{}", art);
            }
            Some(SessionEvent::PairingToken(code))
        }
        Event::PairSuccess(_) => Some(SessionEvent::Authenticated),
        Event::PairError(e) => Some(SessionEvent::AuthFailure(format!("{:?}", e))),
        Event::Connected(_) => Some(SessionEvent::Ready),
        Event::LoggedOut(_) => Some(SessionEvent::Disconnected("logged out".to_string())),
        Event::Disconnected(_) => Some(SessionEvent::Disconnected(
            "connection closed".to_string(),
        )),
        Event::Message(msg, info) => {
            let body = msg
                .conversation
                .clone()
                .or_else(|| {
                    msg.extended_text_message
                        .as_ref()
                        .and_then(|ext| ext.text.clone())
                })
                .unwrap_or_default();
            Some(SessionEvent::Message(InboundMessage {
                chat: to_web_address(&info.source.chat.to_string()),
                from: to_web_address(&info.source.sender.to_string()),
                body,
                from_me: info.source.is_from_me,
                is_group: info.source.is_group,
                timestamp: info.timestamp,
            }))
        }
        _ => None,
    }
}

fn to_web_address(native: &str) -> String {
    match native.strip_suffix(NATIVE_USER_DOMAIN) {
        Some(user) => format!("{}{}", user, WEB_USER_DOMAIN),
        None => native.to_string(),
    }
}

fn to_native_address(web: &str) -> String {
    match web.strip_suffix(WEB_USER_DOMAIN) {
        Some(user) => format!("{}{}", user, NATIVE_USER_DOMAIN),
        None => web.to_string(),
    }
}

struct WhatsAppClient {
    client: Arc<Client>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl ChatClient for WhatsAppClient {
    async fn send_text(&self, chat: &str, text: &str) -> Result<(), ConnectorError> {
        let jid: Jid = to_native_address(chat)
            .parse()
            .map_err(|e| ConnectorError::Send(format!("bad address {}: {:?}", chat, e)))?;
        let message = waproto::whatsapp::Message {
            conversation: Some(text.to_string()),
            ..Default::default()
        };
        self.client
            .send_message(jid, message)
            .await
            .map(|_| ())
            .map_err(|e| ConnectorError::Send(e.to_string()))
    }

    async fn destroy(&self) -> Result<(), ConnectorError> {
        self.client.disconnect().await;
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_translation() {
        assert_eq!(to_web_address("5511999@s.whatsapp.net"), "5511999@c.us");
        assert_eq!(to_web_address("120363@g.us"), "120363@g.us");
        assert_eq!(to_native_address("5511999@c.us"), "5511999@s.whatsapp.net");
    }

    #[test]
    fn test_store_path_is_per_user() {
        let connector = WhatsAppConnector::new(PathBuf::from("/data"));
        assert_eq!(
            connector.store_path("user/1"),
            PathBuf::from("/data/user_1/session.db")
        );
    }
}
