use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;

use super::credentials::{CredentialError, extract_api_key, resolve_api_key};
use super::session::{session_cookie, verify_session_cookie};
use super::Principal;
use crate::server::AppState;
use crate::types::AuthMethod;

/// The resolved principal of a request; anonymous when no credential is sent.
pub struct Auth(pub Principal);

/// Like [`Auth`], but rejects principals without read access.
pub struct RequireRead(pub Principal);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthErrorKind {
    MissingAuth,
    InvalidScheme,
    InvalidKey,
    InternalError,
}

#[derive(Debug)]
pub struct AuthError {
    kind: AuthErrorKind,
    registry: bool,
}

impl AuthError {
    fn new(kind: AuthErrorKind, parts: &Parts) -> Self {
        Self {
            kind,
            registry: !parts.uri.path().starts_with("/v1/terrareg"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self.kind {
            AuthErrorKind::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthErrorKind::InvalidScheme => {
                (StatusCode::UNAUTHORIZED, "Invalid authorization scheme")
            }
            AuthErrorKind::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            AuthErrorKind::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = if self.registry {
            json!({ "errors": [message] })
        } else {
            json!({ "message": message })
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("Bearer realm=\"terrareg\""),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve_principal(parts, state).map(Auth)
    }
}

impl FromRequestParts<Arc<AppState>> for RequireRead {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = resolve_principal(parts, state)?;
        if !principal.can_read(&state.config) {
            return Err(AuthError::new(AuthErrorKind::MissingAuth, parts));
        }
        Ok(RequireRead(principal))
    }
}

fn resolve_principal(parts: &Parts, state: &Arc<AppState>) -> Result<Principal, AuthError> {
    let key = extract_api_key(&parts.headers).map_err(|e| {
        let kind = match e {
            CredentialError::InvalidScheme => AuthErrorKind::InvalidScheme,
            CredentialError::InvalidKey => AuthErrorKind::InvalidKey,
        };
        AuthError::new(kind, parts)
    })?;

    if let Some(key) = key {
        return resolve_api_key(&state.config, &key)
            .ok_or_else(|| AuthError::new(AuthErrorKind::InvalidKey, parts));
    }

    let Some(cookie) = session_cookie(&parts.headers) else {
        return Ok(Principal::Anonymous);
    };
    let Some(secret) = state.config.session_secret.as_deref() else {
        return Ok(Principal::Anonymous);
    };
    let Some(session_id) = verify_session_cookie(secret, cookie) else {
        tracing::debug!("Ignoring session cookie with invalid signature");
        return Ok(Principal::Anonymous);
    };

    let session = state
        .store
        .get_session(session_id, Utc::now())
        .map_err(|e| {
            tracing::error!("Failed to load session: {e}");
            AuthError::new(AuthErrorKind::InternalError, parts)
        })?;

    Ok(match session {
        Some(session) if session.auth_method == AuthMethod::AdminApiKey => Principal::AdminApiKey,
        Some(session) => Principal::User {
            external_id: session.external_id,
            auth_method: session.auth_method,
            user_groups: session.user_groups,
        },
        None => Principal::Anonymous,
    })
}
