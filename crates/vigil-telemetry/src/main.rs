//! Vigil Telemetry binary entry point.
//!
//! Runs the maintenance side of the engine: the site cleanup worker and the
//! retention sweeps. Ingestion and queries are embedded by the transport
//! that links the library.

use vigil_state::StateProvider;
use vigil_telemetry::{store::MemoryDatabase, Engine, TelemetryConfig};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_telemetry=info,vigil_state=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting vigil-telemetry");

    let config = TelemetryConfig::load()?;
    tracing::info!(
        site_ttl_secs = config.cache.site_ttl_secs,
        retention = config.retention.enabled,
        remote_geo = config.geo.remote_enabled,
        "Configuration loaded"
    );

    let state = StateProvider::from_config(&config.state).await?;
    tracing::info!("State backends connected");

    let database = MemoryDatabase::new();
    let engine = Engine::new(config, state, &database)?;
    let tasks = engine.start_background()?;

    shutdown_signal().await;

    tracing::info!("Shutting down background tasks");
    tasks.shutdown().await;
    engine.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
