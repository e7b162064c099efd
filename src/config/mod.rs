//! Configuration
//!
//! Layered configuration: built-in defaults, an optional TOML file, then
//! `WA_RELAY__*` environment variables, then the plain `BACKEND_URL` and
//! `ADMIN_PHONE` variables used by existing deployments.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for nested keys (`WA_RELAY__BACKEND__BASE_URL`)
pub const ENV_PREFIX: &str = "WA_RELAY";

/// Apology sent to a chat when the backend could not process its message.
pub const DEFAULT_APOLOGY: &str =
    "Desculpe, ocorreu um erro ao processar sua mensagem. Tente novamente em instantes.";

/// Top-level relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Phone number that receives a notice whenever a session comes online
    pub admin_phone: Option<String>,
    pub backend: BackendConfig,
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub logging: LoggingConfig,
}

/// Backend collaborator endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Upper bound for every backend request
    pub timeout_secs: u64,
    pub session_path: String,
    pub pairing_path: String,
    pub status_path: String,
    pub message_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_secs: 15,
            session_path: "/get_whatsapp_session".to_string(),
            pairing_path: "/qr_code".to_string(),
            status_path: "/save_whatsapp_session".to_string(),
            message_path: "/send_message".to_string(),
        }
    }
}

impl BackendConfig {
    /// Join `path` onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Control API listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Session manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Where connectors keep per-user pairing state. Defaults to the
    /// platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Per-session teardown bound during shutdown
    pub shutdown_timeout_secs: u64,
    pub apology_message: String,
    /// Capacity of each session's event queue
    pub event_queue: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            shutdown_timeout_secs: 10,
            apology_message: DEFAULT_APOLOGY.to_string(),
            event_queue: 64,
        }
    }
}

impl SessionsConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("wa-relay")
        })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Also write daily-rolling log files into this directory
    pub dir: Option<PathBuf>,
}

/// Default config file location: `<config_dir>/wa-relay/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wa-relay").join("config.toml"))
}

impl RelayConfig {
    /// Load configuration from the process environment and an optional file.
    ///
    /// Without an explicit `path` the default location is tried and silently
    /// skipped when absent. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let plain: HashMap<String, String> = ["BACKEND_URL", "ADMIN_PHONE"]
            .into_iter()
            .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
            .collect();
        Self::load_with(path, None, plain)
    }

    /// Load with an injected environment. `prefixed` replaces the process
    /// environment for `WA_RELAY__*` lookups when given.
    pub(crate) fn load_with(
        path: Option<&Path>,
        prefixed: Option<HashMap<String, String>>,
        plain: HashMap<String, String>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(p) => {
                tracing::debug!("Loading config file {}", p.display());
                builder = builder.add_source(config::File::from(p.to_path_buf()).required(true));
            }
            None => {
                if let Some(p) = default_config_path() {
                    builder = builder.add_source(config::File::from(p).required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(prefixed),
        );

        builder = builder
            .set_override_option("backend.base_url", plain.get("BACKEND_URL").cloned())
            .map_err(|e| RelayError::Config(e.to_string()))?
            .set_override_option("admin_phone", plain.get("ADMIN_PHONE").cloned())
            .map_err(|e| RelayError::Config(e.to_string()))?;

        let cfg: RelayConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RelayError::Config(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.backend.base_url).map_err(|e| {
            RelayError::Config(format!(
                "backend.base_url '{}' is not a valid URL: {}",
                self.backend.base_url, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::Config(format!(
                "backend.base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.backend.timeout_secs == 0 {
            return Err(RelayError::Config(
                "backend.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.sessions.event_queue == 0 {
            return Err(RelayError::Config(
                "sessions.event_queue must be greater than zero".to_string(),
            ));
        }
        if let Some(phone) = &self.admin_phone
            && phone.trim().is_empty()
        {
            return Err(RelayError::Config("admin_phone is empty".to_string()));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RelayError::Config(e.to_string()))
    }
}
