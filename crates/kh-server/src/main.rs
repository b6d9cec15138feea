//! `kh-server` binary: loads config, connects to Postgres, and runs the
//! HTTP/WebSocket edge plus the scheduler/recovery/ingest loops until
//! ctrl-c.

use anyhow::{Context, Result};
use kh_core::config::Config;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    kh_telemetry::logging::init_logging("kh-server", "info");

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    let api_key = std::env::var("KH_API_KEY").ok().filter(|s| !s.is_empty());
    if api_key.is_none() {
        info!("KH_API_KEY not set, operator API routes are unauthenticated");
    }

    let server = kh_server::Server::connect(config).await.context("failed to start server")?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    server.run(api_key).await
}
