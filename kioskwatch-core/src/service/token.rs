//! Token signing and verification.
//!
//! Two token families share the HS256 signing key:
//! - client identity tokens, presented at the signaling WebSocket
//!   handshake (`client_id` + `role`);
//! - stream tokens, short-lived single-use capabilities admitting one
//!   viewer to one camera on the gateway.
//!
//! Stream tokens are validated with zero leeway: a token presented at its
//! exact expiry instant is rejected.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::config::AuthConfig;
use crate::models::{CameraId, ClientRole, MonitorId};
use crate::{Error, Result};

/// The only permission stream tokens currently carry
pub const VIEW_PERMISSION: &str = "VIEW";

/// Claims of a client identity token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientClaims {
    /// Client ID (kiosk or monitor)
    #[serde(rename = "clientId")]
    pub client_id: String,
    /// Client role (KIOSK or MONITOR)
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl ClientClaims {
    pub fn role(&self) -> Result<ClientRole> {
        ClientRole::from_str(&self.role)
            .map_err(|_| Error::Authentication(format!("Invalid role in token: {}", self.role)))
    }
}

/// Claims of a single-use stream token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamClaims {
    pub camera_id: CameraId,
    /// Audit trail: which monitor requested the token
    pub monitor_id: MonitorId,
    pub permissions: Vec<String>,
    /// Issuance time, ISO-8601
    pub issued_at: DateTime<Utc>,
    /// Expiry, ISO-8601 (mirrors `exp` for human-readable payloads)
    pub expires_at: DateTime<Utc>,
    pub iat: i64,
    pub exp: i64,
}

impl StreamClaims {
    #[must_use]
    pub fn has_view_permission(&self) -> bool {
        self.permissions.iter().any(|p| p == VIEW_PERMISSION)
    }
}

/// A freshly minted stream token with its expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedStreamToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub camera_id: CameraId,
}

/// Signs and verifies both token families with the shared HS256 key
#[derive(Clone)]
pub struct TokenService {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    algorithm: Algorithm,
    stream_token_ttl: Duration,
    client_token_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.algorithm)
            .field("stream_token_ttl", &self.stream_token_ttl)
            .finish()
    }
}

impl TokenService {
    /// Create a token service with an explicit secret
    pub fn new(secret: &str, stream_token_ttl_secs: u64, client_token_ttl_secs: u64) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Internal("Signing key cannot be empty".to_string()));
        }

        Ok(Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            algorithm: Algorithm::HS256,
            stream_token_ttl: Duration::seconds(stream_token_ttl_secs as i64),
            client_token_ttl: Duration::seconds(client_token_ttl_secs as i64),
        })
    }

    /// Build from configuration. A missing signing key logs a warning and
    /// falls back to an ephemeral random key: the process starts, but
    /// tokens will not validate across processes or restarts.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let secret = match &config.signing_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => {
                warn!(
                    "No signing key configured; using an ephemeral random key. \
                     Tokens will not validate across services or restarts."
                );
                use rand::Rng;
                let bytes: [u8; 32] = rand::thread_rng().gen();
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(bytes)
            }
        };
        Self::new(
            &secret,
            config.stream_token_ttl_secs,
            config.client_token_ttl_secs,
        )
    }

    /// Sign a client identity token
    pub fn sign_client_token(&self, client_id: &str, role: ClientRole) -> Result<String> {
        let now = Utc::now();
        let claims = ClientClaims {
            client_id: client_id.to_string(),
            role: role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + self.client_token_ttl).timestamp(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign client token: {e}")))
    }

    /// Verify a client identity token and extract claims
    pub fn verify_client_token(&self, token: &str) -> Result<ClientClaims> {
        let token_data: TokenData<ClientClaims> =
            decode(token, &self.decoding_key, &self.validation(60))
                .map_err(|e| Self::map_jwt_error(&e))?;
        Ok(token_data.claims)
    }

    /// Sign a single-use stream token for one camera
    pub fn sign_stream_token(
        &self,
        camera_id: &CameraId,
        monitor_id: &MonitorId,
    ) -> Result<SignedStreamToken> {
        let now = Utc::now();
        let expires_at = now + self.stream_token_ttl;
        let claims = StreamClaims {
            camera_id: camera_id.clone(),
            monitor_id: monitor_id.clone(),
            permissions: vec![VIEW_PERMISSION.to_string()],
            issued_at: now,
            expires_at,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign stream token: {e}")))?;

        Ok(SignedStreamToken {
            token,
            expires_at,
            camera_id: camera_id.clone(),
        })
    }

    /// Verify a stream token with zero leeway
    pub fn verify_stream_token(&self, token: &str) -> Result<StreamClaims> {
        let token_data: TokenData<StreamClaims> =
            decode(token, &self.decoding_key, &self.validation(0))
                .map_err(|e| Self::map_jwt_error(&e))?;
        Ok(token_data.claims)
    }

    fn validation(&self, leeway_secs: u64) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = leeway_secs;
        validation
    }

    fn map_jwt_error(err: &jsonwebtoken::errors::Error) -> Error {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                Error::Authentication("Token expired".to_string())
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                Error::Authentication("Invalid token signature".to_string())
            }
            _ => Error::Authentication("Invalid token".to_string()),
        }
    }
}
