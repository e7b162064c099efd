use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wa_relay::backend::HttpBackend;
use wa_relay::config::RelayConfig;
use wa_relay::connector::SessionConnector;
use wa_relay::relay::SessionManager;

#[derive(Parser, Debug)]
#[command(name = "wa-relay", version, about = "Multi-user WhatsApp session relay")]
struct Cli {
    /// Config file (defaults to <config_dir>/wa-relay/config.toml)
    #[arg(short, long, env = "WA_RELAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control API and session manager (default)
    Serve {
        /// Listen address, overrides `server.bind`
        #[arg(short, long)]
        bind: Option<String>,

        /// Start sessions for these users at boot
        #[arg(long = "init", value_name = "USER_ID")]
        init: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RelayConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve {
        bind: None,
        init: Vec::new(),
    }) {
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Serve { bind, init } => {
            let _guard = wa_relay::logging::init(&config.logging)?;
            serve(config, bind, init).await
        }
    }
}

#[cfg(feature = "whatsapp")]
fn connector(config: &RelayConfig) -> anyhow::Result<Arc<dyn SessionConnector>> {
    use wa_relay::connector::WhatsAppConnector;
    Ok(Arc::new(WhatsAppConnector::new(config.sessions.data_dir())))
}

#[cfg(not(feature = "whatsapp"))]
fn connector(_config: &RelayConfig) -> anyhow::Result<Arc<dyn SessionConnector>> {
    anyhow::bail!("wa-relay was built without the `whatsapp` feature; rebuild with --features whatsapp")
}

async fn serve(config: RelayConfig, bind: Option<String>, init: Vec<String>) -> anyhow::Result<()> {
    let backend = Arc::new(HttpBackend::new(config.backend.clone())?);
    let manager = Arc::new(SessionManager::from_config(&config, connector(&config)?, backend));

    for user_id in &init {
        if let Err(e) = manager.initialize(user_id).await {
            tracing::error!("WhatsApp: boot session for {} failed: {}", user_id, e);
        }
    }

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Control API listening on {}", bind);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    axum::serve(listener, wa_relay::api::create_router(manager.clone()))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("Control API failed")?;

    let report = manager.shutdown().await;
    if report.is_clean() {
        tracing::info!("Shutdown complete, {} session(s) closed", report.closed);
    } else {
        for failure in &report.failures {
            tracing::warn!(
                "Shutdown: session for {} did not close cleanly: {}",
                failure.user_id,
                failure.reason
            );
        }
    }
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
