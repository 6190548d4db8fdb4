use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

use super::{BlobStore, ByteStream, PutOutcome, StorageError, StorageResult, copy_hashed, validate_path};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

fn map_sdk_error<E>(err: SdkError<E>, path: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let SdkError::ServiceError(ref service_err) = err
        && service_err.raw().status().as_u16() == 404
    {
        return StorageError::NotFound(path.to_string());
    }
    StorageError::S3(Box::new(err))
}

/// S3-compatible blob store.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    max_object_size: u64,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
        max_object_size: u64,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access key id and secret access key when either is set"
                    .to_string(),
            ));
        }

        let region = Region::new(region.unwrap_or_else(|| "us-east-1".to_string()));
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            builder = builder.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "terrareg-config",
            ));
        }

        if let Some(endpoint) = endpoint {
            let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint
            } else {
                format!("http://{endpoint}")
            };
            builder = builder.endpoint_url(endpoint);
        }

        if force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            prefix: prefix.map(|p| p.trim_end_matches('/').to_string()),
            max_object_size,
        })
    }

    fn full_key(&self, path: &str) -> StorageResult<String> {
        validate_path(path)?;
        Ok(match &self.prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{path}"),
            _ => path.to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for S3Backend {
    /// The body is spooled to a local temp file first so the size cap and
    /// checksum are known before anything reaches the bucket.
    #[instrument(skip(self, reader), fields(backend = "s3"))]
    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<PutOutcome> {
        let key = self.full_key(path)?;
        let spool = std::env::temp_dir().join(format!("terrareg-s3-{}", Uuid::new_v4()));

        let result = async {
            let mut file = File::create(&spool).await?;
            let outcome = copy_hashed(reader, &mut file, self.max_object_size).await?;
            file.sync_all().await?;
            drop(file);

            let body = S3Body::from_path(&spool)
                .await
                .map_err(|e| StorageError::S3(Box::new(e)))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_length(outcome.size as i64)
                .body(body)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, path))?;
            Ok(outcome)
        }
        .await;

        let _ = fs::remove_file(&spool).await;
        result
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, path: &str) -> StorageResult<ByteStream> {
        let key = self.full_key(path)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, path))?;

        let stream = ReaderStream::new(output.body.into_async_read())
            .map(|chunk| chunk.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, path: &str) -> StorageResult<()> {
        let key = self.full_key(path)?;
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match map_sdk_error(e, path) {
                StorageError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let key = self.full_key(path)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match map_sdk_error(e, path) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        let marker = self.full_key(".terrareg-health-check")?;

        let probe = async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&marker)
                .body(S3Body::from_static(b"health-check"))
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &marker))?;
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&marker)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &marker))?;
            Ok(())
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out",
                ))
            })?
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
