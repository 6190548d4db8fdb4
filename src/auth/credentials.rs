use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use super::Principal;
use crate::config::ServerConfig;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "X-Terrareg-ApiKey";

const SECRET_BYTES: usize = 32;

/// Generates a URL-safe random secret.
#[must_use]
pub fn random_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compares two credentials without short-circuiting on the first differing byte.
#[must_use]
pub fn credentials_match(expected: &str, presented: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(expected.as_bytes());
    let tag = mac.finalize().into_bytes();

    let Ok(mut mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(presented.as_bytes());
    mac.verify_slice(&tag).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    InvalidScheme,
    InvalidKey,
}

/// Reads an API key from `Authorization: Bearer` or `X-Terrareg-ApiKey`.
pub fn extract_api_key(headers: &HeaderMap) -> Result<Option<String>, CredentialError> {
    if let Some(value) = headers.get(API_KEY_HEADER) {
        let key = value.to_str().map_err(|_| CredentialError::InvalidKey)?.trim();
        if key.is_empty() {
            return Err(CredentialError::InvalidKey);
        }
        return Ok(Some(key.to_string()));
    }

    match headers.get(AUTHORIZATION).map(|h| h.to_str()) {
        None => Ok(None),
        Some(Err(_)) => Err(CredentialError::InvalidKey),
        Some(Ok(header)) => match header.strip_prefix("Bearer ") {
            Some(key) if !key.trim().is_empty() => Ok(Some(key.trim().to_string())),
            Some(_) => Err(CredentialError::InvalidKey),
            None => Err(CredentialError::InvalidScheme),
        },
    }
}

/// Resolves a presented key against the configured admin, upload and
/// analytics keys, in that order. Every configured key is compared.
#[must_use]
pub fn resolve_api_key(config: &ServerConfig, key: &str) -> Option<Principal> {
    let admin = config
        .admin_authentication_token
        .as_deref()
        .is_some_and(|token| credentials_match(token, key));

    let mut upload = false;
    for candidate in &config.upload_api_keys {
        upload |= credentials_match(candidate, key);
    }

    let mut environment = None;
    for entry in &config.analytics_auth_keys {
        let Some((candidate, env)) = entry.split_once(':') else {
            continue;
        };
        if credentials_match(candidate, key) && environment.is_none() {
            environment = Some(env.to_string());
        }
    }

    if admin {
        Some(Principal::AdminApiKey)
    } else if upload {
        Some(Principal::UploadToken)
    } else {
        environment.map(|environment| Principal::AnalyticsKey { environment })
    }
}
