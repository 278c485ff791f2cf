//! Camera registry.
//!
//! Holds the camera table for the control plane. The RTSP URL is treated
//! as write-only: list/get return [`CameraInfo`] projections, and the
//! full record is only handed out to the code path that pushes
//! registrations to the gateway.

use chrono::Utc;
use dashmap::DashMap;
use tracing::info;

use crate::models::{Camera, CameraId, CameraInfo, CameraStatus};
use crate::validation::{validate_identifier, validate_rtsp_url};
use crate::{Error, Result};

/// Registration request for a new camera
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub camera_id: CameraId,
    pub rtsp_url: String,
    pub location: Option<String>,
    pub enabled: Option<bool>,
}

/// In-memory camera table with per-key locking via sharded map entries
#[derive(Debug, Default)]
pub struct CameraRegistry {
    cameras: DashMap<CameraId, Camera>,
}

impl CameraRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera. Rejects duplicate ids and non-RTSP URLs.
    /// New cameras default to enabled with status OFFLINE.
    pub fn register(&self, config: CameraConfig) -> Result<CameraInfo> {
        validate_identifier("camera", config.camera_id.as_str())?;
        validate_rtsp_url(&config.rtsp_url)?;

        let now = Utc::now();
        let camera = Camera {
            camera_id: config.camera_id.clone(),
            rtsp_url: config.rtsp_url,
            location: config.location,
            enabled: config.enabled.unwrap_or(true),
            registered_at: now,
            status: CameraStatus::Offline,
            last_status_update: now,
        };

        match self.cameras.entry(config.camera_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::AlreadyExists(format!(
                "Camera {} is already registered",
                config.camera_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let info = camera.info();
                info!(camera_id = %camera.camera_id, url = %camera.masked_url(), "Camera registered");
                entry.insert(camera);
                Ok(info)
            }
        }
    }

    /// Outward projection of one camera (no RTSP URL)
    pub fn get(&self, camera_id: &CameraId) -> Result<CameraInfo> {
        self.cameras
            .get(camera_id)
            .map(|c| c.info())
            .ok_or_else(|| Error::NotFound(format!("Camera {camera_id} not found")))
    }

    /// Full record including the RTSP URL, for pushing to the gateway only
    pub fn get_with_url(&self, camera_id: &CameraId) -> Result<Camera> {
        self.cameras
            .get(camera_id)
            .map(|c| c.clone())
            .ok_or_else(|| Error::NotFound(format!("Camera {camera_id} not found")))
    }

    /// List cameras, optionally only the enabled ones
    pub fn list(&self, enabled_only: bool) -> Vec<CameraInfo> {
        let mut cameras: Vec<CameraInfo> = self
            .cameras
            .iter()
            .filter(|c| !enabled_only || c.enabled)
            .map(|c| c.info())
            .collect();
        cameras.sort_by(|a, b| a.camera_id.as_str().cmp(b.camera_id.as_str()));
        cameras
    }

    /// Deregister a camera
    pub fn remove(&self, camera_id: &CameraId) -> Result<()> {
        self.cameras
            .remove(camera_id)
            .map(|_| info!(camera_id = %camera_id, "Camera deregistered"))
            .ok_or_else(|| Error::NotFound(format!("Camera {camera_id} not found")))
    }

    /// Status update from the health-callback sink
    pub fn update_status(&self, camera_id: &CameraId, status: CameraStatus) -> Result<()> {
        let mut camera = self
            .cameras
            .get_mut(camera_id)
            .ok_or_else(|| Error::NotFound(format!("Camera {camera_id} not found")))?;
        camera.status = status;
        camera.last_status_update = Utc::now();
        Ok(())
    }

    /// Enable or disable token issuance for a camera
    pub fn set_enabled(&self, camera_id: &CameraId, enabled: bool) -> Result<()> {
        let mut camera = self
            .cameras
            .get_mut(camera_id)
            .ok_or_else(|| Error::NotFound(format!("Camera {camera_id} not found")))?;
        camera.enabled = enabled;
        Ok(())
    }

    /// Guard for token issuance: camera must exist and be enabled
    pub fn ensure_streamable(&self, camera_id: &CameraId) -> Result<()> {
        let camera = self
            .cameras
            .get(camera_id)
            .ok_or_else(|| Error::NotFound(format!("Camera {camera_id} not found")))?;
        if !camera.enabled {
            return Err(Error::Authorization(format!(
                "Camera {camera_id} is disabled"
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}
