//! Single-use enforcement for stream tokens.
//!
//! The gateway records every admitted token value until its expiry; a
//! second presentation of the same value is rejected. The set is bounded
//! by token TTL: a periodic sweep drops entries whose expiry has passed.
//! For a multi-gateway deployment this would move to a shared key/value
//! store with native expiry; the interface stays the same.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Sweep cadence for expired entries
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Bounded record of consumed tokens
#[derive(Debug, Default)]
pub struct ReplaySet {
    seen: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ReplaySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a token as consumed.
    ///
    /// Returns `false` if the exact token value was already consumed
    /// (replay); `true` on first use. `expires_at` is kept as the purge
    /// deadline.
    pub async fn try_consume(&self, token: &str, expires_at: DateTime<Utc>) -> bool {
        let mut seen = self.seen.write().await;
        if seen.contains_key(token) {
            return false;
        }
        seen.insert(token.to_string(), expires_at);
        true
    }

    /// Drop entries whose expiry has passed. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut seen = self.seen.write().await;
        let before = seen.len();
        seen.retain(|_, expires_at| *expires_at > now);
        let removed = before - seen.len();
        if removed > 0 {
            debug!(removed, remaining = seen.len(), "Swept expired replay entries");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.seen.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.read().await.is_empty()
    }

    /// Spawn the background sweeper (every 5 minutes)
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }
}
