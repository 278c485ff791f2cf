//! Shared startup plumbing for the KioskWatch binaries.

use anyhow::Result;
use kioskwatch_core::Config;
use tracing::info;

/// Load configuration (optional `KIOSKWATCH_CONFIG` file path plus
/// environment overrides) and fail fast on validation errors.
pub fn load_config() -> Result<Config> {
    let config_file = std::env::var("KIOSKWATCH_CONFIG").ok();
    let config = Config::load(config_file.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        anyhow::bail!("Configuration validation failed with {} error(s)", errors.len());
    }

    Ok(config)
}

/// Resolve when the process receives Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
