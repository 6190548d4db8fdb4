//! Signed session cookies.
//!
//! The cookie carries only `{id}.{signature}`; everything else is loaded
//! from the session row on each request.

use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::random_secret;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{AuthMethod, Session};

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "terrareg_session";

fn mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::internal(format!("Failed to create HMAC instance: {e}")))
}

/// Cookie value for session `id`.
pub fn sign_session_id(secret: &str, id: &str) -> Result<String> {
    let mut mac = mac(secret)?;
    mac.update(id.as_bytes());
    Ok(format!("{id}.{}", hex::encode(mac.finalize().into_bytes())))
}

/// Returns the session id if the signature is valid.
#[must_use]
pub fn verify_session_cookie<'a>(secret: &str, value: &'a str) -> Option<&'a str> {
    let (id, signature) = value.rsplit_once('.')?;
    let signature = hex::decode(signature).ok()?;
    let mut mac = mac(secret).ok()?;
    mac.update(id.as_bytes());
    mac.verify_slice(&signature).ok()?;
    Some(id)
}

/// Finds the session cookie among the request's cookies.
#[must_use]
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE).then_some(value)
        })
}

#[must_use]
pub fn set_cookie_header(cookie_value: &str, max_age: u64) -> String {
    format!("{SESSION_COOKIE}={cookie_value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}")
}

#[must_use]
pub fn clear_cookie_header() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Creates and stores a session lasting `ttl_secs`.
pub fn create_session(
    store: &dyn Store,
    external_id: &str,
    auth_method: AuthMethod,
    user_groups: Vec<String>,
    ttl_secs: u64,
) -> Result<Session> {
    let now = Utc::now();
    let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX / 1000);
    let session = Session {
        id: random_secret(),
        external_id: external_id.to_string(),
        auth_method,
        user_groups,
        created_at: now,
        expires_at: now + Duration::seconds(ttl),
    };
    store.create_session(&session)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_signed_cookie_round_trip() {
        let value = sign_session_id("secret", "abc123").unwrap();
        assert_eq!(verify_session_cookie("secret", &value), Some("abc123"));
        assert_eq!(verify_session_cookie("other", &value), None);
    }

    #[test]
    fn test_tampered_cookie_rejected() {
        let value = sign_session_id("secret", "abc123").unwrap();
        let tampered = value.replacen("abc123", "abc124", 1);
        assert_eq!(verify_session_cookie("secret", &tampered), None);
        assert_eq!(verify_session_cookie("secret", "no-signature"), None);
    }

    #[test]
    fn test_session_cookie_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; terrareg_session=id.sig; other=1"),
        );
        assert_eq!(session_cookie(&headers), Some("id.sig"));
    }
}
