//! Gateway HTTP surface: viewer admission WebSocket, health snapshot,
//! token debugging, and the camera push endpoint used by the control
//! plane.

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use kioskwatch_core::models::CameraId;
use kioskwatch_core::service::{ReplaySet, TokenService};
use kioskwatch_core::Error;

use crate::admission::{self, AdmissionError};
use crate::health::GATEWAY_SECRET_HEADER;
use crate::supervisor::{StreamSupervisor, WorkerSnapshot};
use crate::worker::StreamVariant;

/// Shared state for the gateway's handlers
#[derive(Clone)]
pub struct GatewayState {
    pub supervisor: Arc<StreamSupervisor>,
    pub tokens: Arc<TokenService>,
    pub replay: Arc<ReplaySet>,
    /// Pre-shared secret required on camera push when configured
    pub gateway_secret: Option<String>,
    /// Root of the HLS fallback output, echoed to HLS viewers
    pub hls_root: String,
}

/// Build the gateway router
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_snapshot))
        .route("/validate-token", post(validate_token))
        .route("/register-camera", post(register_camera))
        .route("/cameras", get(list_cameras))
        .route("/cameras/:id", delete(remove_camera))
        .route("/webrtc", get(viewer_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthSnapshot {
    status: &'static str,
    cameras: usize,
    workers: Vec<WorkerSnapshot>,
    timestamp: DateTime<Utc>,
}

/// `GET /health` — status snapshot of the worker table
async fn health_snapshot(State(state): State<GatewayState>) -> Json<HealthSnapshot> {
    Json(HealthSnapshot {
        status: "ok",
        cameras: state.supervisor.camera_ids().len(),
        workers: state.supervisor.worker_snapshots(),
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
struct ValidateTokenRequest {
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateTokenResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    camera_id: Option<CameraId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// `POST /validate-token` — verify a stream token without consuming it
async fn validate_token(
    State(state): State<GatewayState>,
    Json(request): Json<ValidateTokenRequest>,
) -> Json<ValidateTokenResponse> {
    match state.tokens.verify_stream_token(&request.token) {
        Ok(claims) => Json(ValidateTokenResponse {
            valid: true,
            camera_id: Some(claims.camera_id),
            expires_at: Some(claims.expires_at),
            reason: None,
        }),
        Err(err) => Json(ValidateTokenResponse {
            valid: false,
            camera_id: None,
            expires_at: None,
            reason: Some(err.to_string()),
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterCameraRequest {
    camera_id: CameraId,
    rtsp_url: String,
}

/// Shared-secret guard for the camera push surface
fn check_gateway_secret(
    state: &GatewayState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    if let Some(expected) = &state.gateway_secret {
        let provided = headers
            .get(GATEWAY_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Invalid gateway secret"})),
            ));
        }
    }
    Ok(())
}

/// `POST /register-camera` — the control plane pushes camera sources
/// here. Guarded by the shared gateway secret when configured.
async fn register_camera(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(request): Json<RegisterCameraRequest>,
) -> impl IntoResponse {
    if let Err(rejection) = check_gateway_secret(&state, &headers) {
        return rejection;
    }

    match state
        .supervisor
        .register_camera(request.camera_id.clone(), request.rtsp_url)
    {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"cameraId": request.camera_id})),
        ),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": err.to_string()})),
        ),
    }
}

/// `DELETE /cameras/{id}` — the control plane pushes camera removals
/// here. Guarded by the shared gateway secret when configured.
async fn remove_camera(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    check_gateway_secret(&state, &headers)?;

    state
        .supervisor
        .remove_camera(&CameraId::from_string(id))
        .map_err(|err| {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": err.to_string()})),
            )
        })?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /cameras` — registered camera ids (never URLs)
async fn list_cameras(State(state): State<GatewayState>) -> Json<Vec<CameraId>> {
    Json(state.supervisor.camera_ids())
}

#[derive(Debug, Deserialize)]
struct ViewerQuery {
    token: Option<String>,
    #[serde(default)]
    variant: Option<StreamVariant>,
}

/// `GET /webrtc?token=…[&variant=hls]` — token admission, then the
/// viewer WebSocket.
///
/// Admission failures are rejected before the upgrade with the stable
/// machine-readable reason.
async fn viewer_handler(
    State(state): State<GatewayState>,
    Query(query): Query<ViewerQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let claims = admission::admit(&state.tokens, &state.replay, query.token.as_deref())
        .await
        .map_err(admission_rejection)?;

    let variant = query.variant.unwrap_or(StreamVariant::LowLatency);
    let camera_id = claims.camera_id.clone();

    Ok(ws.on_upgrade(move |socket| handle_viewer(socket, state, camera_id, variant)))
}

fn admission_rejection(err: AdmissionError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err.reason {
        admission::REASON_TOKEN_REQUIRED => StatusCode::UNAUTHORIZED,
        admission::REASON_NO_VIEW_PERMISSION => StatusCode::FORBIDDEN,
        _ => StatusCode::UNAUTHORIZED,
    };
    (status, Json(serde_json::json!({"error": err.reason})))
}

async fn handle_viewer(
    socket: axum::extract::ws::WebSocket,
    state: GatewayState,
    camera_id: CameraId,
    variant: StreamVariant,
) {
    // The viewer is bound to the single camera from its token for the
    // whole connection; starting the worker happens here
    let attachment = match state.supervisor.attach_viewer(&camera_id, variant).await {
        Ok(attachment) => attachment,
        Err(err) => {
            let reason = match &err {
                Error::Resource(msg) | Error::NotFound(msg) => msg.clone(),
                other => other.to_string(),
            };
            warn!(camera_id = %camera_id, reason = %reason, "Viewer attach failed after admission");
            let mut socket = socket;
            let _ = socket
                .send(axum::extract::ws::Message::Close(Some(
                    axum::extract::ws::CloseFrame {
                        code: 1013, // try again later
                        reason: reason.into(),
                    },
                )))
                .await;
            return;
        }
    };

    info!(
        camera_id = %camera_id,
        variant = variant.as_str(),
        "Viewer connected"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    // Keep the slot guard alive for the connection lifetime; dropping it
    // on any exit path releases the viewer count
    let _guard = attachment.guard;
    let mut frames = attachment.frames;

    if variant == StreamVariant::Hls {
        // HLS viewers poll segments from disk; tell them where, then hold
        // the connection open purely for viewer accounting
        let ready = serde_json::json!({
            "type": "hls-ready",
            "playlist": format!("{}/{}/index.m3u8", state.hls_root, camera_id),
        });
        if ws_tx
            .send(axum::extract::ws::Message::Text(ready.to_string()))
            .await
            .is_err()
        {
            return;
        }
    }

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(chunk) => {
                    if ws_tx
                        .send(axum::extract::ws::Message::Binary(chunk.to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                // Worker stopped, permanently failed, or this viewer was
                // dropped for falling behind
                None => {
                    debug!(camera_id = %camera_id, "Frame stream ended, closing viewer");
                    break;
                }
            },
            message = ws_rx.next() => match message {
                Some(Ok(axum::extract::ws::Message::Close(_))) | Some(Err(_)) | None => break,
                // Viewers are read-only; inbound data is ignored
                _ => {}
            },
        }
    }

    info!(camera_id = %camera_id, "Viewer disconnected");
}
