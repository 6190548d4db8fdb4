use thiserror::Error;

use crate::storage::StorageError;

/// Classification used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Unauthorized,
    Forbidden,
    Conflict,
    PayloadTooLarge,
    NotImplemented,
    Upstream,
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("tag does not match tag format: {0}")]
    BadTagFormat(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BadRequest(_) | Self::BadTagFormat(_) | Self::InvalidVersion(_) => {
                ErrorKind::BadRequest
            }
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Storage(e) => e.kind(),
            Self::Database(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ErrorKind::Conflict
            }
            Self::Database(_) | Self::Io(_) | Self::Config(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Upstream failures are retried internally with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Upstream
    }

    /// Message safe to show to a client. Internal details stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            ErrorKind::Conflict if matches!(self, Self::Database(_)) => {
                "Resource already exists".to_string()
            }
            ErrorKind::Upstream if matches!(self, Self::Storage(_)) => {
                "Storage backend unavailable".to_string()
            }
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_kinds() {
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::BadTagFormat("v1".to_string()).kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(Error::conflict("locked").kind(), ErrorKind::Conflict);
        assert_eq!(Error::internal("boom").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_only_upstream_is_retryable() {
        assert!(Error::Upstream("clone failed".to_string()).is_retryable());
        assert!(!Error::bad_request("nope").is_retryable());
    }

    #[test]
    fn test_internal_message_is_hidden() {
        let err = Error::internal("secret path /var/lib");
        assert_eq!(err.public_message(), "Internal server error");
        assert_eq!(Error::not_found("Module not found").public_message(), "Module not found");
    }
}
