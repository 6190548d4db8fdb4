use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

use super::{BlobStore, ByteStream, PutOutcome, StorageError, StorageResult, copy_hashed, validate_path};

const TEMP_DIR: &str = ".tmp";
const HEALTH_MARKER: &str = ".terrareg-health-check";

/// Blob store rooted at a local directory.
pub struct FilesystemBackend {
    root: PathBuf,
    max_object_size: u64,
}

impl FilesystemBackend {
    pub async fn new(root: impl AsRef<Path>, max_object_size: u64) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            max_object_size,
        })
    }

    fn object_path(&self, path: &str) -> StorageResult<PathBuf> {
        validate_path(path)?;
        if path.starts_with(TEMP_DIR) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(path))
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(TEMP_DIR).join(Uuid::new_v4().to_string())
    }

    fn from_io(path: &str, e: std::io::Error) -> StorageError {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self, reader), fields(backend = "filesystem"))]
    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<PutOutcome> {
        let final_path = self.object_path(path)?;
        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp_file = File::create(&temp_path).await?;
        let outcome = match copy_hashed(reader, &mut temp_file, self.max_object_size).await {
            Ok(outcome) => outcome,
            Err(e) => {
                drop(temp_file);
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };
        temp_file.sync_all().await?;
        drop(temp_file);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(outcome)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, path: &str) -> StorageResult<ByteStream> {
        let object_path = self.object_path(path)?;
        let file = File::open(&object_path)
            .await
            .map_err(|e| Self::from_io(path, e))?;
        let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, path: &str) -> StorageResult<()> {
        let object_path = self.object_path(path)?;
        match fs::remove_file(&object_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let object_path = self.object_path(path)?;
        Ok(fs::try_exists(&object_path).await?)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let marker = self.root.join(HEALTH_MARKER);
        fs::write(&marker, b"health-check").await?;
        fs::remove_file(&marker).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
