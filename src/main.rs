use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kreme_proxy::{config::Config, datasources::Registry, proxy::ProxyServer};

#[derive(Parser)]
#[command(name = "kreme-proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A header-injecting HTTP forward proxy")]
struct Cli {
    /// Path to the YAML configuration document.
    #[arg(long = "config", default_value = "./config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kreme_proxy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let registry = Registry::with_builtins();
    let config = Config::load(&cli.config, &registry)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    info!(path = %cli.config.display(), "configuration loaded");

    let server = ProxyServer::new(config)?;
    info!(host = %server.host(), port = server.port(), "starting proxy");

    server.serve_with_shutdown(shutdown_signal()).await?;
    info!("shutdown complete");

    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM, satisfying the
/// graceful-shutdown expectations of a long-running service.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            signal.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
