//! Stream gateway entry point: per-camera transcoder supervision, token
//! admission, and health reporting.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use kioskwatch::{load_config, shutdown_signal};
use kioskwatch_core::logging;
use kioskwatch_core::service::{ReplaySet, TokenService};
use kioskwatch_gateway::health::HealthReporter;
use kioskwatch_gateway::{create_router, GatewayState, StreamSupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    logging::init_logging(&config.logging)?;

    info!("KioskWatch gateway starting...");
    info!("Listen address: {}", config.gateway.listen_addr);

    let tokens = Arc::new(TokenService::from_config(&config.auth)?);
    let replay = Arc::new(ReplaySet::new());
    let supervisor = Arc::new(StreamSupervisor::new(config.gateway.clone()));

    // Background maintenance: replay-set sweep and idle-worker reaping
    let _sweeper = Arc::clone(&replay).spawn_sweeper();
    let _reaper = Arc::clone(&supervisor).spawn_reaper();

    // Health batches to the control plane, when configured
    let _reporter = HealthReporter::new(
        config.gateway.health_callback_url.clone(),
        config.gateway.gateway_secret.clone(),
        config.gateway.health_interval(),
        Arc::clone(&supervisor),
    )
    .map(HealthReporter::spawn);

    let state = GatewayState {
        supervisor: Arc::clone(&supervisor),
        tokens,
        replay,
        gateway_secret: config.gateway.gateway_secret.clone(),
        hls_root: config.gateway.hls_root.clone(),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.gateway.listen_addr).await?;
    info!("Gateway listening on {}", config.gateway.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown();
    info!("Gateway shut down gracefully");
    Ok(())
}
