//! Bearer-token authentication for the control-backend HTTP API.
//!
//! Client identity tokens (minted by the external login endpoint with the
//! shared signing key) arrive as `Authorization: Bearer <jwt>`. Handlers
//! that are monitor-only call [`require_monitor`].

use axum::http::HeaderMap;

use kioskwatch_core::models::{ClientRole, MonitorId};
use kioskwatch_core::service::TokenService;

use super::error::AppError;

/// Authenticated identity extracted from a request
#[derive(Debug, Clone)]
pub struct AuthedClient {
    pub client_id: String,
    pub role: ClientRole,
}

/// Extract and verify the bearer token from request headers
pub fn authenticate(tokens: &TokenService, headers: &HeaderMap) -> Result<AuthedClient, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

    let claims = tokens
        .verify_client_token(token)
        .map_err(|e| AppError::unauthorized(format!("Invalid token: {e}")))?;
    let role = claims
        .role()
        .map_err(|e| AppError::unauthorized(format!("Invalid token: {e}")))?;

    Ok(AuthedClient {
        client_id: claims.client_id,
        role,
    })
}

/// Monitor-only guard; kiosks get 403
pub fn require_monitor(tokens: &TokenService, headers: &HeaderMap) -> Result<MonitorId, AppError> {
    let client = authenticate(tokens, headers)?;
    if client.role != ClientRole::Monitor {
        return Err(AppError::forbidden(
            "This endpoint is restricted to monitors",
        ));
    }
    Ok(MonitorId::from_string(client.client_id))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn tokens() -> TokenService {
        TokenService::new("test-key", 60, 3600).unwrap()
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_monitor_token_accepted() {
        let svc = tokens();
        let token = svc.sign_client_token("m1", ClientRole::Monitor).unwrap();
        let monitor_id = require_monitor(&svc, &headers_with(&token)).unwrap();
        assert_eq!(monitor_id.as_str(), "m1");
    }

    #[test]
    fn test_kiosk_token_forbidden() {
        let svc = tokens();
        let token = svc.sign_client_token("k1", ClientRole::Kiosk).unwrap();
        let err = require_monitor(&svc, &headers_with(&token)).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_missing_header_unauthorized() {
        let err = require_monitor(&tokens(), &HeaderMap::new()).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_garbage_token_unauthorized() {
        let err = require_monitor(&tokens(), &headers_with("not.a.jwt")).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }
}
