//! Viewer admission: single-use stream token validation.
//!
//! Checks run in a fixed order — signature/expiry, replay, permission —
//! and every failure carries one of the stable machine-readable reasons
//! the protocol promises to clients.

use chrono::Utc;
use tracing::{debug, info};

use kioskwatch_core::service::{ReplaySet, StreamClaims, TokenService};
use kioskwatch_core::Error;

pub const REASON_TOKEN_REQUIRED: &str = "Token required";
pub const REASON_INVALID_SIGNATURE: &str = "Invalid token signature";
pub const REASON_TOKEN_EXPIRED: &str = "Token expired";
pub const REASON_TOKEN_REPLAYED: &str = "Token already used";
pub const REASON_NO_VIEW_PERMISSION: &str = "No VIEW permission";

/// Why a viewer was turned away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionError {
    pub reason: &'static str,
}

impl AdmissionError {
    const fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason)
    }
}

impl std::error::Error for AdmissionError {}

/// Validate a stream token and consume it against the replay set.
///
/// On success the claims bind the viewer to exactly one camera for the
/// lifetime of its connection.
pub async fn admit(
    tokens: &TokenService,
    replay: &ReplaySet,
    token: Option<&str>,
) -> Result<StreamClaims, AdmissionError> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Err(AdmissionError::new(REASON_TOKEN_REQUIRED));
    };

    // 1. Signature and expiry against the shared key
    let claims = tokens.verify_stream_token(token).map_err(|err| {
        debug!(error = %err, "Stream token failed verification");
        match err {
            Error::Authentication(msg) if msg == "Token expired" => {
                AdmissionError::new(REASON_TOKEN_EXPIRED)
            }
            _ => AdmissionError::new(REASON_INVALID_SIGNATURE),
        }
    })?;

    // The JWT layer works at second granularity; reject the exact-expiry
    // boundary explicitly
    if claims.expires_at <= Utc::now() {
        return Err(AdmissionError::new(REASON_TOKEN_EXPIRED));
    }

    // 2. Single use: the exact token value is recorded until expiry
    if !replay.try_consume(token, claims.expires_at).await {
        info!(
            camera_id = %claims.camera_id,
            monitor_id = %claims.monitor_id,
            "Rejected replayed stream token"
        );
        return Err(AdmissionError::new(REASON_TOKEN_REPLAYED));
    }

    // 3. Permission
    if !claims.has_view_permission() {
        return Err(AdmissionError::new(REASON_NO_VIEW_PERMISSION));
    }

    info!(
        camera_id = %claims.camera_id,
        monitor_id = %claims.monitor_id,
        "Viewer admitted"
    );
    Ok(claims)
}
