use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
///
/// Both binaries load the same structure; the hub reads `hub`/`auth`,
/// the gateway reads `gateway`/`auth`. They share only `auth.signing_key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hub: HubConfig,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub listen_addr: String,
    /// Sessions idle longer than this are reaped
    pub session_timeout_ms: u64,
    /// Reaper scan cadence
    pub session_reap_interval_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            session_timeout_ms: 300_000,
            session_reap_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub max_viewers_per_camera: usize,
    /// A worker with zero viewers for this long is stopped
    pub stream_timeout_no_viewers_ms: u64,
    /// Reaper scan cadence
    pub stream_reap_interval_ms: u64,
    /// Delay before restarting a crashed worker
    pub auto_restart_delay_ms: u64,
    /// Restart budget before a worker is declared permanently failed
    pub max_restarts: u32,
    pub health_check_interval_ms: u64,
    /// Control-plane endpoint receiving the health batch; reporting is
    /// disabled when unset
    pub health_callback_url: Option<String>,
    /// Base URL where the control plane reaches the gateway; camera
    /// pushes from the hub are disabled when unset
    pub gateway_url: Option<String>,
    /// Pre-shared secret sent as X-Gateway-Secret on both directions
    /// (health batches and camera pushes)
    pub gateway_secret: Option<String>,
    pub ffmpeg_path: String,
    /// Directory for HLS fallback playlists/segments (per-camera subdirs)
    pub hls_root: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8090".to_string(),
            max_viewers_per_camera: 10,
            stream_timeout_no_viewers_ms: 60_000,
            stream_reap_interval_ms: 30_000,
            auto_restart_delay_ms: 5_000,
            max_restarts: 5,
            health_check_interval_ms: 30_000,
            health_callback_url: None,
            gateway_url: None,
            gateway_secret: None,
            ffmpeg_path: "ffmpeg".to_string(),
            hls_root: "./hls".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing key shared between hub and gateway. Missing key logs
    /// a warning and falls back to an ephemeral random key.
    pub signing_key: Option<String>,
    pub stream_token_ttl_secs: u64,
    pub client_token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            stream_token_ttl_secs: 60,
            client_token_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (`KIOSKWATCH_` prefix, highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("KIOSKWATCH")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Fail fast on misconfigurations
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.hub.session_timeout_ms == 0 {
            errors.push("hub.session_timeout_ms must be positive".to_string());
        }
        if self.gateway.max_viewers_per_camera == 0 {
            errors.push("gateway.max_viewers_per_camera must be positive".to_string());
        }
        if self.gateway.ffmpeg_path.is_empty() {
            errors.push("gateway.ffmpeg_path must not be empty".to_string());
        }
        if self.auth.stream_token_ttl_secs == 0 {
            errors.push("auth.stream_token_ttl_secs must be positive".to_string());
        }
        if let Some(key) = &self.auth.signing_key {
            if key.is_empty() {
                errors.push("auth.signing_key must not be empty when set".to_string());
            }
        }
        if let Some(url) = &self.gateway.health_callback_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push("gateway.health_callback_url must be an http(s) URL".to_string());
            }
        }
        if let Some(url) = &self.gateway.gateway_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push("gateway.gateway_url must be an http(s) URL".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl HubConfig {
    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    #[must_use]
    pub const fn session_reap_interval(&self) -> Duration {
        Duration::from_millis(self.session_reap_interval_ms)
    }
}

impl GatewayConfig {
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_no_viewers_ms)
    }

    #[must_use]
    pub const fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.stream_reap_interval_ms)
    }

    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.auto_restart_delay_ms)
    }

    #[must_use]
    pub const fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}
