//! # flyprint-edge
//!
//! Edge node binary: connects the site's managed printers to the FlyPrint
//! cloud.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        flyprint-edge                                    │
//! │                                                                         │
//! │  load agent.toml + env ──► build EdgeAgent ──► start                    │
//! │                                                  │                      │
//! │                          every 5 min: log status ◄┤                     │
//! │                                                  │                      │
//! │                               Ctrl+C / SIGTERM ──► stop                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `flyprint-edge [CONFIG_PATH]`. Without a path the platform config
//! directory is used. `RUST_LOG` controls log verbosity.

mod backend;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use flyprint_sync::{AgentConfig, EdgeAgent, SyncError};

use crate::backend::UnavailableBackend;

/// How often aggregate status is written to the log.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting flyprint-edge");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AgentConfig::load(config_path).context("loading agent configuration")?;

    let mut agent = EdgeAgent::builder(config)
        .with_backend(Arc::new(UnavailableBackend))
        .build()
        .context("building edge agent")?;

    match agent.start().await {
        Ok(node_id) => info!(node_id = %node_id, "Edge node online"),
        Err(SyncError::CloudDisabled) => {
            warn!("Cloud sync disabled; set cloud.enabled or FLYPRINT_CLOUD_ENABLED");
            return Ok(());
        }
        Err(e) => return Err(e).context("starting edge agent"),
    }

    let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
    ticker.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => log_status(&agent).await,
            _ = &mut shutdown => break,
        }
    }

    agent.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn log_status(agent: &EdgeAgent) {
    let status = agent.status().await;
    let (heartbeat_failures, degraded) = status
        .heartbeat
        .as_ref()
        .map(|h| (h.failures, h.degraded))
        .unwrap_or_default();
    let (connection, queued) = status
        .realtime
        .as_ref()
        .map(|r| (r.state.to_string(), r.queued))
        .unwrap_or_else(|| ("none".to_string(), 0));

    info!(
        node_id = ?status.node_id,
        heartbeat_failures,
        degraded,
        realtime = %connection,
        queued,
        active_jobs = status.active_jobs.len(),
        "Edge node status"
    );
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
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
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping edge agent");
}
