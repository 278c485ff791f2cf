//! Signaling hub entry point: presence, sessions, call control, and the
//! control-backend HTTP API.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use kioskwatch::{load_config, shutdown_signal};
use kioskwatch_core::logging;
use kioskwatch_core::service::{CameraRegistry, SignalingService, TokenService};
use kioskwatch_hub::{create_router, AppState, GatewayClient};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    logging::init_logging(&config.logging)?;

    info!("KioskWatch hub starting...");
    info!("Listen address: {}", config.hub.listen_addr);

    let tokens = Arc::new(TokenService::from_config(&config.auth)?);
    let registry = Arc::new(CameraRegistry::new());
    let signaling = Arc::new(SignalingService::new(config.hub.session_timeout()));

    // Session timeout reaper
    let _reaper = Arc::clone(&signaling).spawn_session_reaper(config.hub.session_reap_interval());

    // Camera pushes keep the gateway's camera table in sync
    let gateway = GatewayClient::new(
        config.gateway.gateway_url.clone(),
        config.gateway.gateway_secret.clone(),
    )
    .map(Arc::new);
    if gateway.is_none() {
        info!("No gateway URL configured, camera pushes disabled");
    }

    let state = AppState {
        signaling,
        registry,
        tokens,
        gateway,
        gateway_secret: config.gateway.gateway_secret.clone(),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.hub.listen_addr).await?;
    info!("Hub listening on {}", config.hub.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Hub shut down gracefully");
    Ok(())
}
