#![forbid(unsafe_code)]

use anyhow::Context;
use ftpgate::{config::Config, server::ServerConfig, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .init();

    let handle = ftpgate::start(ServerConfig::from(&config), AppState::from_config(&config)).await?;
    tracing::info!(
        addr = %handle.addr(),
        admin_addr = ?handle.admin_addr(),
        tree_cache_ttl_secs = config.tree_cache_ttl.as_secs(),
        max_download_rate = config.max_download_rate,
        "ftpgate listening"
    );

    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm => {},
    }

    tracing::info!("shutdown signal received, draining connections");
    handle.shutdown().await
}
