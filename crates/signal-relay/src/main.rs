//! Signal Relay
//!
//! WebSocket signaling server for Parley calls.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the room registry actor
//! 4. Bind the listener and serve the router (ws + health + static)
//! 5. Wait for shutdown signal, then drain via cancellation token

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use signal_relay::actors::RoomRegistryHandle;
use signal_relay::config::Config;
use signal_relay::metrics::RelayMetrics;
use signal_relay::observability::HealthState;
use signal_relay::ws::app_router;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Signal Relay");

    // Load configuration
    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        bind_address = %config.bind_address,
        static_root = %config.static_root.display(),
        "Configuration loaded"
    );

    // Initialize Prometheus metrics recorder before anything records
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus metrics recorder: {e}"))?;

    // Actor system
    let relay_metrics = RelayMetrics::new();
    let registry = RoomRegistryHandle::new(Arc::clone(&relay_metrics));
    info!("Room registry started");

    let health_state = Arc::new(HealthState::new());

    // Router: ws + health + static assets, plus the Prometheus endpoint
    let metrics_router = Router::new().route(
        "/metrics",
        get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = app_router(
        registry.clone(),
        Arc::clone(&health_state),
        &config.static_root,
    )
    .merge(metrics_router);

    // Bind before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!(addr = %config.bind_address, "Listener bound");

    health_state.set_ready();

    let shutdown_token = registry.child_token();
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let token = shutdown_token.clone();
        async move {
            token.cancelled().await;
            info!("Server shutting down");
        }
    });

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!(error = %e, "Server failed");
        }
    });

    info!("Signal Relay running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();

    // Cancelling the registry's root token closes every connection and
    // stops the accept loop via the child token above.
    registry.cancel();
    tokio::time::sleep(Duration::from_secs(1)).await;

    info!("Signal Relay shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; without them the
/// service could never shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
