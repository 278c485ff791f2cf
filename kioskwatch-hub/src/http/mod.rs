//! Control-backend HTTP surface.

pub mod auth;
pub mod cameras;
pub mod error;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use kioskwatch_core::service::{CameraRegistry, SignalingService, TokenService};

use crate::gateway::GatewayClient;

pub use error::{AppError, AppResult};

/// Shared state for the hub's HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    pub signaling: Arc<SignalingService>,
    pub registry: Arc<CameraRegistry>,
    pub tokens: Arc<TokenService>,
    /// Push client keeping the gateway's camera table in sync (None when
    /// no gateway URL is configured)
    pub gateway: Option<Arc<GatewayClient>>,
    /// Pre-shared secret expected on health callbacks (optional)
    pub gateway_secret: Option<String>,
}

/// Build the hub router: signaling WebSocket + control-backend API
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/ws", get(crate::ws::websocket_handler))
        .route("/api/cctv/cameras", get(cameras::list_cameras))
        .route("/api/cctv/cameras", post(cameras::register_camera))
        .route("/api/cctv/cameras/:id", get(cameras::get_camera))
        .route("/api/cctv/cameras/:id", delete(cameras::remove_camera))
        .route("/api/cctv/stream-token", post(cameras::issue_stream_token))
        .route("/api/cctv/health-callback", post(cameras::health_callback))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
