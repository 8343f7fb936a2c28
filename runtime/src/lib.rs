//! VIRTA Runtime - process wrapper for a telemetry pipeline
//!
//! Provides [`run()`] for zero-boilerplate startup: load configuration from
//! the environment, initialise tracing and metrics, start the service, and
//! stop it cleanly on SIGINT/SIGTERM.
//!
//! # Quick start
//!
//! ```ignore
//! use virta_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let (tx, rx) = tokio::sync::mpsc::channel(1024);
//!     // ... spawn the subscription task feeding `tx` ...
//!     let service = Arc::new(TelemetryService::new(rx, filter, connections, processor, writer));
//!     virta_runtime::run(config, service).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod prelude;

use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use virta_pipeline::{Config, LogFormat, Metrics, TelemetryService};

/// Run a telemetry service to completion
///
/// Initialises tracing and metrics, connects and starts the service, then
/// blocks until SIGINT or SIGTERM, stopping the service (which drains both
/// batching stages) before returning.
pub async fn run(config: Config, service: Arc<TelemetryService>) -> anyhow::Result<()> {
    init_tracing(&config);

    if let Err(e) = Metrics::init() {
        // Embedders may have initialised metrics already; not fatal
        tracing::debug!(error = %e, "metrics registry already initialised");
    }

    info!(
        batch_size = config.batch_size,
        batch_timeout_ms = config.batch_timeout.as_millis() as u64,
        max_pending_points = config.max_pending_points,
        "starting VIRTA"
    );

    service.connect().await?;
    service.start()?;

    shutdown_signal().await;

    service.stop().await?;
    info!("VIRTA shutdown complete");

    Ok(())
}

/// Initialise the tracing subscriber based on config
pub fn init_tracing(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format {
        LogFormat::Json => {
            let _ = registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init();
        }
        LogFormat::Pretty => {
            let _ = registry.with(tracing_subscriber::fmt::layer()).try_init();
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
