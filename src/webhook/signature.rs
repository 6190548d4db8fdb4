use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const SHA256_PREFIX: &str = "sha256=";

/// Signature header value for `body` under `key`.
pub fn sign(key: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| Error::internal(format!("Failed to create HMAC instance: {e}")))?;
    mac.update(body);
    Ok(format!("{SHA256_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Checks a webhook signature against every configured key.
///
/// With no keys configured unsigned requests are accepted. Every key is
/// evaluated so the timing does not depend on which one matched.
pub fn verify_signature(keys: &[String], body: &[u8], header: Option<&str>) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }

    let header = header.ok_or_else(|| Error::unauthorized("Missing webhook signature"))?;
    let encoded = header
        .trim()
        .strip_prefix(SHA256_PREFIX)
        .ok_or_else(|| Error::unauthorized("Unsupported webhook signature algorithm"))?;
    let signature =
        hex::decode(encoded).map_err(|_| Error::unauthorized("Malformed webhook signature"))?;

    let mut matched = false;
    for key in keys {
        let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
            continue;
        };
        mac.update(body);
        matched |= mac.verify_slice(&signature).is_ok();
    }

    if matched {
        Ok(())
    } else {
        Err(Error::unauthorized("Invalid webhook signature"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<String> {
        vec!["first-key".to_string(), "second-key".to_string()]
    }

    #[test]
    fn test_accepts_any_configured_key() {
        let body = br#"{"action":"published"}"#;
        assert!(verify_signature(&keys(), body, Some(&sign("first-key", body).unwrap())).is_ok());
        assert!(verify_signature(&keys(), body, Some(&sign("second-key", body).unwrap())).is_ok());
    }

    #[test]
    fn test_rejects_wrong_key_and_tampered_body() {
        let body = b"payload";
        let err = verify_signature(&keys(), body, Some(&sign("other", body).unwrap())).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let signature = sign("first-key", body).unwrap();
        assert!(verify_signature(&keys(), b"payload!", Some(&signature)).is_err());
    }

    #[test]
    fn test_missing_or_malformed_header() {
        assert!(matches!(
            verify_signature(&keys(), b"x", None),
            Err(Error::Unauthorized(_))
        ));
        assert!(verify_signature(&keys(), b"x", Some("sha1=abcdef")).is_err());
        assert!(verify_signature(&keys(), b"x", Some("sha256=zz")).is_err());
    }

    #[test]
    fn test_no_keys_accepts_unsigned() {
        assert!(verify_signature(&[], b"anything", None).is_ok());
    }
}
