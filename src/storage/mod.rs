//! Artifact blob storage.
//!
//! Module archives and provider binaries live under logical paths such as
//! `modules/{ns}/{mod}/{prov}/{ver}/source.tar.gz`. Backends stream both ways
//! and never expose a partially written object.

mod filesystem;
#[cfg(feature = "s3")]
mod s3;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{ServerConfig, StorageBackendKind};
use crate::error::ErrorKind;

pub use filesystem::FilesystemBackend;
#[cfg(feature = "s3")]
pub use s3::S3Backend;

const COPY_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("object exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(Box<dyn std::error::Error + Send + Sync>),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidPath(_) => ErrorKind::BadRequest,
            Self::TooLarge { .. } => ErrorKind::PayloadTooLarge,
            Self::S3(_) => ErrorKind::Upstream,
            Self::Io(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Result of a completed `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub size: u64,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub sha256: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Streams `reader` into `path`, replacing any existing object atomically.
    /// Fails with [`StorageError::TooLarge`] once the backend's cap is crossed,
    /// leaving prior content untouched.
    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<PutOutcome>;

    async fn get(&self, path: &str) -> StorageResult<ByteStream>;

    /// Removing a missing object is not an error.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Write-and-remove probe run once at startup.
    async fn health_check(&self) -> StorageResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Convenience wrapper for callers holding the whole object in memory.
pub async fn put_bytes(store: &dyn BlobStore, path: &str, data: &[u8]) -> StorageResult<PutOutcome> {
    let mut reader = data;
    store.put(path, &mut reader).await
}

/// Reads a whole object into memory. Only used for small objects and tests.
pub async fn get_bytes(store: &dyn BlobStore, path: &str) -> StorageResult<Vec<u8>> {
    use futures::StreamExt;

    let mut stream = store.get(path).await?;
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Copies an object to a new path, streaming through the backend.
pub async fn copy_object(store: &dyn BlobStore, from: &str, to: &str) -> StorageResult<PutOutcome> {
    use futures::TryStreamExt;
    use tokio_util::io::StreamReader;

    let stream = store.get(from).await?.map_err(std::io::Error::other);
    let mut reader = StreamReader::new(stream);
    store.put(to, &mut reader).await
}

#[must_use]
pub fn module_archive_path(
    namespace: &str,
    module: &str,
    provider: &str,
    version: &str,
    ext: &str,
) -> String {
    format!("modules/{namespace}/{module}/{provider}/{version}/source.{ext}")
}

#[must_use]
pub fn provider_binary_path(namespace: &str, provider: &str, version: &str, filename: &str) -> String {
    format!("providers/{namespace}/{provider}/{version}/{filename}")
}

/// Builds the backend selected by `storage_backend`.
pub async fn connect(config: &ServerConfig) -> StorageResult<Arc<dyn BlobStore>> {
    let max_object_size = config.max_upload_size;
    match config.storage_backend {
        StorageBackendKind::Local => {
            let backend = FilesystemBackend::new(&config.storage_root, max_object_size).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "s3")]
        StorageBackendKind::S3 => {
            let bucket = config
                .s3_bucket
                .as_deref()
                .ok_or_else(|| StorageError::Config("s3_bucket is required".to_string()))?;
            let backend = S3Backend::new(
                bucket,
                config.s3_endpoint.clone(),
                config.s3_region.clone(),
                config.s3_prefix.clone(),
                config.s3_access_key_id.clone(),
                config.s3_secret_access_key.clone(),
                config.s3_force_path_style,
                max_object_size,
            )
            .await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "s3"))]
        StorageBackendKind::S3 => Err(StorageError::Config(
            "this build does not include the s3 storage backend".to_string(),
        )),
    }
}

/// Rejects anything but plain relative components.
pub(crate) fn validate_path(path: &str) -> StorageResult<()> {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    for component in std::path::Path::new(path).components() {
        if !matches!(component, std::path::Component::Normal(_)) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
    }
    Ok(())
}

/// Copies `reader` into `writer`, hashing as it goes and stopping at `max`.
pub(crate) async fn copy_hashed<W>(
    reader: &mut (dyn AsyncRead + Unpin + Send),
    writer: &mut W,
    max: u64,
) -> StorageResult<PutOutcome>
where
    W: AsyncWrite + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut size: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        size += n as u64;
        if size > max {
            return Err(StorageError::TooLarge { limit: max });
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
    }
    writer.flush().await?;

    Ok(PutOutcome {
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(
            module_archive_path("acme", "widget", "aws", "1.0.0", "tar.gz"),
            "modules/acme/widget/aws/1.0.0/source.tar.gz"
        );
        assert_eq!(
            provider_binary_path("hashicorp", "aws", "4.0.0", "terraform-provider-aws_4.0.0_linux_amd64.zip"),
            "providers/hashicorp/aws/4.0.0/terraform-provider-aws_4.0.0_linux_amd64.zip"
        );
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("modules/a/b/c/1.0.0/source.zip").is_ok());
        assert!(validate_path("../escape").is_err());
        assert!(validate_path("/abs").is_err());
        assert!(validate_path("a/./b").is_ok());
        assert!(validate_path("a/../b").is_err());
        assert!(validate_path("").is_err());
    }

    #[tokio::test]
    async fn test_copy_hashed_enforces_cap() {
        let mut reader: &[u8] = b"0123456789";
        let mut sink = Vec::new();
        let result = copy_hashed(&mut reader, &mut sink, 5).await;
        assert!(matches!(result, Err(StorageError::TooLarge { limit: 5 })));
    }

    #[tokio::test]
    async fn test_copy_hashed_digest() {
        let mut reader: &[u8] = b"hello";
        let mut sink = Vec::new();
        let outcome = copy_hashed(&mut reader, &mut sink, 1024).await.unwrap();
        assert_eq!(outcome.size, 5);
        assert_eq!(
            outcome.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(sink, b"hello");
    }

    #[tokio::test]
    async fn test_copy_object() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FilesystemBackend::new(dir.path(), 1024).await.unwrap();
        put_bytes(&store, "modules/a/one", b"data").await.unwrap();

        let outcome = copy_object(&store, "modules/a/one", "modules/b/two").await.unwrap();
        assert_eq!(outcome.size, 4);
        assert_eq!(get_bytes(&store, "modules/b/two").await.unwrap(), b"data");
    }
}
