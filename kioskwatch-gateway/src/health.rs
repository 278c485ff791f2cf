//! Periodic health reporting to the control plane.
//!
//! Every tick the gateway posts the full camera health batch to the
//! configured callback endpoint, carrying the pre-shared secret header
//! when one is set. A failed post is logged and retried on the next
//! tick; the reporter never takes the process down.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::supervisor::StreamSupervisor;

pub const GATEWAY_SECRET_HEADER: &str = "X-Gateway-Secret";

/// Posts health batches on a fixed interval
pub struct HealthReporter {
    client: reqwest::Client,
    callback_url: String,
    gateway_secret: Option<String>,
    interval: Duration,
    supervisor: Arc<StreamSupervisor>,
}

impl HealthReporter {
    /// Returns `None` when no callback URL is configured (reporting
    /// disabled).
    pub fn new(
        callback_url: Option<String>,
        gateway_secret: Option<String>,
        interval: Duration,
        supervisor: Arc<StreamSupervisor>,
    ) -> Option<Self> {
        let callback_url = callback_url?;
        Some(Self {
            client: reqwest::Client::new(),
            callback_url,
            gateway_secret,
            interval,
            supervisor,
        })
    }

    /// Spawn the reporting loop
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            url = %self.callback_url,
            interval = ?self.interval,
            "Health reporter started"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.report_once().await;
            }
        })
    }

    async fn report_once(&self) {
        let batch = self.supervisor.health_snapshot();
        if batch.is_empty() {
            debug!("No cameras registered, skipping health report");
            return;
        }

        let mut request = self.client.post(&self.callback_url).json(&batch);
        if let Some(secret) = &self.gateway_secret {
            request = request.header(GATEWAY_SECRET_HEADER, secret);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(cameras = batch.len(), "Health batch posted");
            }
            Ok(response) => {
                warn!(
                    status = %response.status(),
                    "Health callback rejected, will retry next tick"
                );
            }
            Err(err) => {
                warn!(error = %err, "Health callback failed, will retry next tick");
            }
        }
    }
}
