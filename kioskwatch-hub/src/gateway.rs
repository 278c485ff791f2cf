//! Camera push client for the stream gateway.
//!
//! The registry is the source of truth for cameras, but the gateway
//! keeps its own `camera_id → rtsp_url` table for worker startup. Every
//! successful registration or removal on the control plane is pushed to
//! the gateway here, carrying the shared secret header — the mirror
//! image of the gateway's health-callback direction.
//!
//! Push failures are logged, not fatal: the registry stays authoritative
//! and an operator can re-register the camera once the gateway is back.

use tracing::{info, warn};

use kioskwatch_core::models::{Camera, CameraId};

const GATEWAY_SECRET_HEADER: &str = "X-Gateway-Secret";

/// HTTP client for the gateway's camera table
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    gateway_secret: Option<String>,
}

impl GatewayClient {
    /// Returns `None` when no gateway URL is configured (pushes
    /// disabled).
    pub fn new(gateway_url: Option<String>, gateway_secret: Option<String>) -> Option<Self> {
        let base_url = gateway_url?.trim_end_matches('/').to_string();
        info!(url = %base_url, "Gateway camera pushes enabled");
        Some(Self {
            client: reqwest::Client::new(),
            base_url,
            gateway_secret,
        })
    }

    fn with_secret(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.gateway_secret {
            Some(secret) => request.header(GATEWAY_SECRET_HEADER, secret),
            None => request,
        }
    }

    /// Push one camera registration to `POST /register-camera`
    pub async fn push_camera(&self, camera: &Camera) {
        let body = serde_json::json!({
            "cameraId": camera.camera_id,
            "rtspUrl": camera.rtsp_url,
        });
        let request = self
            .with_secret(self.client.post(format!("{}/register-camera", self.base_url)))
            .json(&body);

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(
                    camera_id = %camera.camera_id,
                    url = %camera.masked_url(),
                    "Camera pushed to gateway"
                );
            }
            Ok(response) => {
                warn!(
                    camera_id = %camera.camera_id,
                    status = %response.status(),
                    "Gateway rejected camera push"
                );
            }
            Err(err) => {
                warn!(
                    camera_id = %camera.camera_id,
                    error = %err,
                    "Failed to push camera to gateway"
                );
            }
        }
    }

    /// Push one camera removal to `DELETE /cameras/{id}`
    pub async fn remove_camera(&self, camera_id: &CameraId) {
        let request =
            self.with_secret(self.client.delete(format!("{}/cameras/{camera_id}", self.base_url)));

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(camera_id = %camera_id, "Camera removal pushed to gateway");
            }
            Ok(response) => {
                warn!(
                    camera_id = %camera_id,
                    status = %response.status(),
                    "Gateway rejected camera removal"
                );
            }
            Err(err) => {
                warn!(
                    camera_id = %camera_id,
                    error = %err,
                    "Failed to push camera removal to gateway"
                );
            }
        }
    }
}
