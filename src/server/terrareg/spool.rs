use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Uploaded file written to a scratch path, removed on drop.
pub struct SpooledFile {
    path: PathBuf,
    pub size: u64,
    /// Client-supplied file name, unvalidated.
    pub filename: Option<String>,
}

impl SpooledFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpooledFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(e.body_text())
    } else {
        Error::bad_request(format!("Failed to read multipart body: {}", e.body_text()))
    }
}

/// Streams the multipart field `name` to a scratch file, failing once
/// `max_size` is exceeded. Other fields are skipped.
pub async fn spool_multipart_file(
    multipart: &mut Multipart,
    name: &str,
    max_size: u64,
) -> Result<SpooledFile> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(name) {
            return spool_field(field, max_size).await;
        }
    }
    Err(Error::bad_request(format!("Multipart field '{name}' is required")))
}

async fn spool_field(mut field: Field<'_>, max_size: u64) -> Result<SpooledFile> {
    let path = std::env::temp_dir().join(format!("terrareg-upload-{}", uuid::Uuid::new_v4()));
    let filename = field.file_name().map(str::to_string);
    let mut spooled = SpooledFile {
        path,
        size: 0,
        filename,
    };
    let mut file = File::create(&spooled.path).await?;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        spooled.size += chunk.len() as u64;
        if spooled.size > max_size {
            return Err(Error::PayloadTooLarge(format!(
                "Upload exceeds the maximum size of {max_size} bytes"
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok(spooled)
}
