//! # mimigram-server
//!
//! Chat server binary. Loads configuration from the environment, opens the
//! store and serves the REST API and WebSocket endpoint until Ctrl+C.

use tracing::info;
use tracing_subscriber::EnvFilter;

use mimigram_server::api::{self, AppState};
use mimigram_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mimigram_server=debug")),
        )
        .init();

    info!("Starting Mimigram server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let http_addr = config.http_addr;
    let state = AppState::open(config)?;
    info!(storage = ?state.config.storage, "Storage ready");

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
