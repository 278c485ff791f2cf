//! Camera registry and stream-token endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kioskwatch_core::models::{CameraId, CameraInfo, CameraStatus};
use kioskwatch_core::service::registry::CameraConfig;
use kioskwatch_core::service::SignedStreamToken;

use super::auth::require_monitor;
use super::error::{AppError, AppResult};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// `GET /api/cctv/cameras[?enabled=true]`
pub async fn list_cameras(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<CameraInfo>>> {
    require_monitor(&state.tokens, &headers)?;
    Ok(Json(state.registry.list(query.enabled.unwrap_or(false))))
}

/// `GET /api/cctv/cameras/{id}`
pub async fn get_camera(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<CameraInfo>> {
    require_monitor(&state.tokens, &headers)?;
    let info = state.registry.get(&CameraId::from_string(id))?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCameraRequest {
    pub camera_id: CameraId,
    pub rtsp_url: String,
    pub location: Option<String>,
    pub enabled: Option<bool>,
}

/// `POST /api/cctv/cameras`
///
/// On success the full record (RTSP URL included) is pushed to the
/// gateway so its camera table stays in sync with the registry.
pub async fn register_camera(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterCameraRequest>,
) -> AppResult<(StatusCode, Json<CameraInfo>)> {
    require_monitor(&state.tokens, &headers)?;
    let info = state.registry.register(CameraConfig {
        camera_id: request.camera_id,
        rtsp_url: request.rtsp_url,
        location: request.location,
        enabled: request.enabled,
    })?;

    if let Some(gateway) = &state.gateway {
        match state.registry.get_with_url(&info.camera_id) {
            Ok(camera) => gateway.push_camera(&camera).await,
            Err(err) => warn!(
                camera_id = %info.camera_id,
                error = %err,
                "Camera vanished before gateway push"
            ),
        }
    }

    Ok((StatusCode::CREATED, Json(info)))
}

/// `DELETE /api/cctv/cameras/{id}`
pub async fn remove_camera(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    require_monitor(&state.tokens, &headers)?;
    let camera_id = CameraId::from_string(id);
    state.registry.remove(&camera_id)?;

    if let Some(gateway) = &state.gateway {
        gateway.remove_camera(&camera_id).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTokenRequest {
    pub camera_id: CameraId,
}

/// `POST /api/cctv/stream-token`
///
/// Monitor-only. The camera must exist and be enabled. Issuance is
/// audit-logged with the requesting monitor.
pub async fn issue_stream_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StreamTokenRequest>,
) -> AppResult<Json<SignedStreamToken>> {
    let monitor_id = require_monitor(&state.tokens, &headers)?;
    state.registry.ensure_streamable(&request.camera_id)?;

    let signed = state
        .tokens
        .sign_stream_token(&request.camera_id, &monitor_id)?;
    info!(
        camera_id = %request.camera_id,
        monitor_id = %monitor_id,
        expires_at = %signed.expires_at,
        "Stream token issued"
    );
    Ok(Json(signed))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCallbackEntry {
    pub camera_id: CameraId,
    pub status: CameraStatus,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthCallbackResponse {
    pub updated: usize,
}

/// `POST /api/cctv/health-callback`
///
/// Ingest the gateway's periodic health batch. Gated by the pre-shared
/// `X-Gateway-Secret` header when one is configured. Entries for unknown
/// cameras are logged and skipped rather than failing the batch.
pub async fn health_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(batch): Json<Vec<HealthCallbackEntry>>,
) -> AppResult<Json<HealthCallbackResponse>> {
    if let Some(expected) = &state.gateway_secret {
        let provided = headers
            .get("X-Gateway-Secret")
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return Err(AppError::unauthorized("Invalid gateway secret"));
        }
    }

    let mut updated = 0;
    for entry in batch {
        match state.registry.update_status(&entry.camera_id, entry.status) {
            Ok(()) => updated += 1,
            Err(err) => warn!(
                camera_id = %entry.camera_id,
                error = %err,
                "Health callback for unknown camera"
            ),
        }
        if let Some(message) = &entry.message {
            if entry.status == CameraStatus::Error {
                warn!(camera_id = %entry.camera_id, message = %message, "Camera reported error");
            }
        }
    }
    Ok(Json(HealthCallbackResponse { updated }))
}
