//! Worker table and lifecycle policy.
//!
//! Get-or-create with per-key creation locks (double-checked so two
//! concurrent viewers of the same camera share one worker), idle-timeout
//! reaping, and the health snapshot posted to the control plane.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kioskwatch_core::config::GatewayConfig;
use kioskwatch_core::models::{CameraId, CameraStatus, StreamHealth};
use kioskwatch_core::validation::{mask_rtsp_credentials, validate_identifier, validate_rtsp_url};
use kioskwatch_core::{Error, Result};

use crate::worker::{
    StreamVariant, StreamWorker, ViewerGuard, WorkerRunConfig, WorkerStatus,
};

/// An admitted viewer: the frame receiver plus the slot guard keeping the
/// worker's accounting honest
#[derive(Debug)]
pub struct ViewerAttachment {
    pub guard: ViewerGuard,
    pub frames: mpsc::Receiver<bytes::Bytes>,
}

/// Per-worker entry in the snapshot returned by `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    pub camera_id: CameraId,
    pub variant: StreamVariant,
    pub status: WorkerStatus,
    pub viewer_count: usize,
    pub restart_count: u32,
}

/// Supervisor of all per-camera workers
pub struct StreamSupervisor {
    workers: DashMap<String, Arc<StreamWorker>>,
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Camera table pushed from the control plane: id → RTSP URL (secret)
    cameras: DashMap<CameraId, String>,
    config: GatewayConfig,
}

impl StreamSupervisor {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            workers: DashMap::new(),
            creation_locks: DashMap::new(),
            cameras: DashMap::new(),
            config,
        }
    }

    /// Register (or update) a camera source. Resets any permanently
    /// failed worker so the camera can stream again — this is the
    /// "external intervention" that re-arms a worker past its restart
    /// budget.
    pub fn register_camera(&self, camera_id: CameraId, rtsp_url: String) -> Result<()> {
        validate_identifier("camera", camera_id.as_str())?;
        validate_rtsp_url(&rtsp_url)?;

        info!(
            camera_id = %camera_id,
            url = %mask_rtsp_credentials(&rtsp_url),
            "Camera registered with gateway"
        );
        self.cameras.insert(camera_id.clone(), rtsp_url);

        for variant in [StreamVariant::LowLatency, StreamVariant::Hls] {
            let key = Self::worker_key(&camera_id, variant);
            if let Some((_, worker)) = self
                .workers
                .remove_if(&key, |_, w| w.status() == WorkerStatus::Failed)
            {
                info!(camera_id = %worker.camera_id, "Cleared permanently failed worker on re-registration");
            }
        }
        Ok(())
    }

    /// Drop a camera pushed off the control plane: the table entry goes
    /// away and any workers for it are stopped, disconnecting viewers.
    pub fn remove_camera(&self, camera_id: &CameraId) -> Result<()> {
        self.cameras
            .remove(camera_id)
            .ok_or_else(|| Error::NotFound(format!("Camera {camera_id} is not registered")))?;

        for variant in [StreamVariant::LowLatency, StreamVariant::Hls] {
            let key = Self::worker_key(camera_id, variant);
            if let Some((_, worker)) = self.workers.remove(&key) {
                worker.request_stop();
            }
        }
        info!(camera_id = %camera_id, "Camera removed from gateway");
        Ok(())
    }

    /// Camera ids known to the gateway (URLs stay secret)
    pub fn camera_ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self.cameras.iter().map(|c| c.key().clone()).collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Admit one viewer to a camera, starting the worker if needed.
    ///
    /// Double-checked creation: the fast path reuses a joinable worker
    /// without locking; otherwise a per-key lock serializes creation so
    /// concurrent first viewers share one child process.
    pub async fn attach_viewer(
        &self,
        camera_id: &CameraId,
        variant: StreamVariant,
    ) -> Result<ViewerAttachment> {
        let rtsp_url = self
            .cameras
            .get(camera_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| Error::NotFound(format!("Camera {camera_id} is not registered")))?;

        let key = Self::worker_key(camera_id, variant);

        // Fast path: reuse the live worker
        if let Some(worker) = self.get_joinable(&key) {
            let (guard, frames) = worker.attach_viewer()?;
            return Ok(ViewerAttachment { guard, frames });
        }

        // Slow path: serialize creation per key
        let lock = self
            .creation_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _creation_guard = lock.lock().await;

        if let Some(worker) = self.get_joinable(&key) {
            debug!(camera_id = %camera_id, "Reusing worker created by concurrent admission");
            let (guard, frames) = worker.attach_viewer()?;
            return Ok(ViewerAttachment { guard, frames });
        }

        // A permanently failed worker stays failed until the camera is
        // re-registered
        if let Some(existing) = self.workers.get(&key) {
            if existing.status() == WorkerStatus::Failed {
                return Err(Error::Resource(format!(
                    "Camera {camera_id} stream permanently failed"
                )));
            }
        }

        let worker = Arc::new(StreamWorker::new(
            camera_id.clone(),
            variant,
            rtsp_url,
            self.config.max_viewers_per_camera,
        ));
        let (guard, frames) = worker.attach_viewer()?;

        self.workers.insert(key, Arc::clone(&worker));
        tokio::spawn(Arc::clone(&worker).run(self.run_config()));
        info!(
            camera_id = %camera_id,
            variant = variant.as_str(),
            "Started stream worker"
        );

        Ok(ViewerAttachment { guard, frames })
    }

    fn get_joinable(&self, key: &str) -> Option<Arc<StreamWorker>> {
        if let Some(worker) = self.workers.get(key) {
            if worker.is_joinable() {
                return Some(Arc::clone(&worker));
            }
            // Stopped workers are stale entries; failed ones are kept so
            // admission keeps rejecting until re-registration
            if worker.status() == WorkerStatus::Stopped {
                drop(worker);
                self.workers.remove(key);
            }
        }
        None
    }

    fn run_config(&self) -> WorkerRunConfig {
        WorkerRunConfig {
            ffmpeg_path: self.config.ffmpeg_path.clone(),
            restart_delay: self.config.restart_delay(),
            max_restarts: self.config.max_restarts,
            hls_root: PathBuf::from(&self.config.hls_root),
        }
    }

    fn worker_key(camera_id: &CameraId, variant: StreamVariant) -> String {
        format!("{}:{}", camera_id, variant.as_str())
    }

    /// Stop workers that have had zero viewers for longer than the idle
    /// timeout. Returns the keys of stopped workers.
    pub fn reap_idle_workers(&self) -> Vec<String> {
        let idle_timeout = self.config.idle_timeout();
        let mut reaped = Vec::new();

        let candidates: Vec<(String, Arc<StreamWorker>)> = self
            .workers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (key, worker) in candidates {
            if worker.viewer_count() == 0
                && worker.idle_for() > idle_timeout
                && matches!(
                    worker.status(),
                    WorkerStatus::Starting | WorkerStatus::Running | WorkerStatus::Error
                )
            {
                info!(
                    camera_id = %worker.camera_id,
                    idle_for = ?worker.idle_for(),
                    "Stopping idle stream worker"
                );
                worker.request_stop();
                self.workers.remove(&key);
                reaped.push(key);
            }
        }
        reaped
    }

    /// Spawn the periodic idle reaper
    pub fn spawn_reaper(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.reap_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = self.reap_idle_workers();
                if !reaped.is_empty() {
                    info!(count = reaped.len(), "Reaped idle stream workers");
                }
            }
        })
    }

    /// Health batch for the control plane: one entry per registered
    /// camera, derived from its primary worker when one exists.
    pub fn health_snapshot(&self) -> Vec<StreamHealth> {
        let now = Utc::now();
        let mut batch: Vec<StreamHealth> = self
            .cameras
            .iter()
            .map(|camera| {
                let key = Self::worker_key(camera.key(), StreamVariant::LowLatency);
                let (status, message) = match self.workers.get(&key) {
                    Some(worker) => match worker.status() {
                        WorkerStatus::Running => (CameraStatus::Online, None),
                        WorkerStatus::Starting | WorkerStatus::Stopping => (
                            CameraStatus::Offline,
                            Some(format!("Worker {:?}", worker.status()).to_lowercase()),
                        ),
                        WorkerStatus::Stopped => (CameraStatus::Offline, None),
                        WorkerStatus::Error => (
                            CameraStatus::Error,
                            Some("Transcoder restarting after failure".to_string()),
                        ),
                        WorkerStatus::Failed => (
                            CameraStatus::Error,
                            Some("Max restart attempts reached".to_string()),
                        ),
                    },
                    None => (CameraStatus::Offline, None),
                };
                StreamHealth {
                    camera_id: camera.key().clone(),
                    status,
                    message,
                    last_seen: now,
                }
            })
            .collect();
        batch.sort_by(|a, b| a.camera_id.as_str().cmp(b.camera_id.as_str()));
        batch
    }

    /// Worker table snapshot for `GET /health`
    pub fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        let mut snapshots: Vec<WorkerSnapshot> = self
            .workers
            .iter()
            .map(|entry| WorkerSnapshot {
                camera_id: entry.camera_id.clone(),
                variant: entry.variant,
                status: entry.status(),
                viewer_count: entry.viewer_count(),
                restart_count: entry.restart_count(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.camera_id.as_str().cmp(b.camera_id.as_str()));
        snapshots
    }

    /// Graceful shutdown: ask every worker to stop
    pub fn shutdown(&self) {
        for entry in self.workers.iter() {
            entry.request_stop();
        }
        self.workers.clear();
        warn!("Stream supervisor shut down, all workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn supervisor(idle_ms: u64) -> StreamSupervisor {
        let config = GatewayConfig {
            // A binary that cannot exist keeps spawn failures fast and
            // deterministic in tests
            ffmpeg_path: "/nonexistent/transcoder-binary".to_string(),
            stream_timeout_no_viewers_ms: idle_ms,
            auto_restart_delay_ms: 10_000,
            max_viewers_per_camera: 2,
            hls_root: std::env::temp_dir()
                .join("kioskwatch-test-hls")
                .to_string_lossy()
                .into_owned(),
            ..GatewayConfig::default()
        };
        StreamSupervisor::new(config)
    }

    fn register(supervisor: &StreamSupervisor) {
        supervisor
            .register_camera(
                CameraId::from("CCTV_01"),
                "rtsp://user:pw@10.0.0.5/stream".to_string(),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_camera_rejected() {
        let sup = supervisor(60_000);
        let err = sup
            .attach_viewer(&CameraId::from("nope"), StreamVariant::LowLatency)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_register_camera_validates_input() {
        let sup = supervisor(60_000);
        assert!(sup
            .register_camera(CameraId::from("bad id"), "rtsp://h/s".to_string())
            .is_err());
        assert!(sup
            .register_camera(CameraId::from("cam"), "http://h/s".to_string())
            .is_err());
    }

    #[tokio::test]
    async fn test_concurrent_viewers_share_one_worker() {
        let sup = Arc::new(supervisor(60_000));
        register(&sup);

        let a = Arc::clone(&sup);
        let b = Arc::clone(&sup);
        let cam_a = CameraId::from("CCTV_01");
        let cam_b = CameraId::from("CCTV_01");
        let (va, vb) = tokio::join!(
            a.attach_viewer(&cam_a, StreamVariant::LowLatency),
            b.attach_viewer(&cam_b, StreamVariant::LowLatency),
        );
        let va = va.unwrap();
        let _vb = vb.unwrap();

        assert_eq!(sup.workers.len(), 1);
        assert_eq!(va.guard.worker().viewer_count(), 2);
    }

    #[tokio::test]
    async fn test_viewer_cap_across_admissions() {
        let sup = supervisor(60_000);
        register(&sup);
        let camera = CameraId::from("CCTV_01");

        let _v1 = sup
            .attach_viewer(&camera, StreamVariant::LowLatency)
            .await
            .unwrap();
        let _v2 = sup
            .attach_viewer(&camera, StreamVariant::LowLatency)
            .await
            .unwrap();
        let err = sup
            .attach_viewer(&camera, StreamVariant::LowLatency)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resource(_)));
    }

    #[tokio::test]
    async fn test_idle_worker_reaped() {
        let sup = supervisor(10);
        register(&sup);
        let camera = CameraId::from("CCTV_01");

        let attachment = sup
            .attach_viewer(&camera, StreamVariant::LowLatency)
            .await
            .unwrap();
        assert!(sup.reap_idle_workers().is_empty());

        drop(attachment);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let reaped = sup.reap_idle_workers();
        assert_eq!(reaped.len(), 1);
        assert!(sup.workers.is_empty());
    }

    #[tokio::test]
    async fn test_worker_with_viewers_not_reaped() {
        let sup = supervisor(10);
        register(&sup);

        let _attachment = sup
            .attach_viewer(&CameraId::from("CCTV_01"), StreamVariant::LowLatency)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sup.reap_idle_workers().is_empty());
    }

    #[tokio::test]
    async fn test_remove_camera_stops_workers_and_rejects_viewers() {
        let sup = supervisor(60_000);
        register(&sup);
        let camera = CameraId::from("CCTV_01");

        let attachment = sup
            .attach_viewer(&camera, StreamVariant::LowLatency)
            .await
            .unwrap();

        sup.remove_camera(&camera).unwrap();
        assert!(sup.workers.is_empty());
        assert!(sup.camera_ids().is_empty());

        // Removing again is not-found, and new viewers are rejected
        assert!(matches!(
            sup.remove_camera(&camera),
            Err(Error::NotFound(_))
        ));
        drop(attachment);
        let err = sup
            .attach_viewer(&camera, StreamVariant::LowLatency)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_health_snapshot_covers_all_cameras() {
        let sup = supervisor(60_000);
        register(&sup);
        sup.register_camera(CameraId::from("CCTV_02"), "rtsp://10.0.0.6/s".to_string())
            .unwrap();

        let batch = sup.health_snapshot();
        assert_eq!(batch.len(), 2);
        // No worker yet: offline
        assert_eq!(batch[0].status, CameraStatus::Offline);
    }

    #[tokio::test]
    async fn test_hls_and_primary_are_distinct_workers() {
        let sup = supervisor(60_000);
        register(&sup);
        let camera = CameraId::from("CCTV_01");

        let _a = sup
            .attach_viewer(&camera, StreamVariant::LowLatency)
            .await
            .unwrap();
        let _b = sup.attach_viewer(&camera, StreamVariant::Hls).await.unwrap();
        assert_eq!(sup.workers.len(), 2);
    }
}
