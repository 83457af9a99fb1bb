//! Spooling of the uploaded file to a scoped temp file.
//!
//! The multipart `image` field is streamed chunk by chunk into a
//! `tempfile` inside the configured upload directory.  The returned
//! [`SpooledUpload`] owns a [`TempPath`], so the file is removed when it
//! is dropped on any exit path; the happy path calls
//! [`SpooledUpload::close`] to observe removal errors.
//!
//! The file size cap is enforced here while streaming.  The router's body
//! limit sits [`MULTIPART_OVERHEAD_BYTES`] above it so that a file of
//! exactly the cap still fits together with its form framing.

use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use std::path::Path;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::ApiError;

/// Multipart field that carries the upload.
pub const IMAGE_FIELD: &str = "image";

/// Content type recorded when the client does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Allowance for boundaries, part headers and small extra fields on top
/// of the file size cap.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

const FILE_TOO_LARGE: &str = "File too large";

/// One uploaded file on local disk.
#[derive(Debug)]
pub struct SpooledUpload {
    /// Client-reported filename, unsanitized.
    pub file_name: Option<String>,
    /// Client-reported MIME type.
    pub content_type: String,
    /// Number of bytes written.
    pub size_bytes: u64,
    path: TempPath,
}

impl SpooledUpload {
    /// Location of the temp file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the temp file, logging (not returning) a failure.
    pub fn close(self) {
        let path = self.path.to_path_buf();
        if let Err(e) = self.path.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove temp upload file");
        }
    }
}

fn map_multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(FILE_TOO_LARGE.to_string())
    } else {
        ApiError::Validation(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// Stream the first `image` field of `multipart` into a temp file in `dir`.
///
/// Returns `Ok(None)` when the body has no `image` field.  Every other
/// field, and any repeated `image` field, is read and discarded.  A file
/// longer than `max_file_bytes` fails with 413 and leaves nothing behind.
pub async fn spool_image(
    multipart: &mut Multipart,
    dir: &Path,
    max_file_bytes: u64,
) -> Result<Option<SpooledUpload>, ApiError> {
    let mut spooled: Option<SpooledUpload> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(map_multipart_error)? {
        if spooled.is_some() || field.name() != Some(IMAGE_FIELD) {
            debug!(field = ?field.name(), "Ignoring multipart field");
            while field.chunk().await.map_err(map_multipart_error)?.is_some() {}
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let (file, path) = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(dir)
            .map_err(|e| {
                anyhow::anyhow!("failed to create temp file in {}: {e}", dir.display())
            })?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut size_bytes: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(map_multipart_error)? {
            size_bytes += chunk.len() as u64;
            if size_bytes > max_file_bytes {
                return Err(ApiError::PayloadTooLarge(FILE_TOO_LARGE.to_string()));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| anyhow::anyhow!("failed to write temp file: {e}"))?;
        }
        file.flush()
            .await
            .map_err(|e| anyhow::anyhow!("failed to flush temp file: {e}"))?;

        debug!(path = %path.display(), size_bytes, "Spooled upload to temp file");
        spooled = Some(SpooledUpload {
            file_name,
            content_type,
            size_bytes,
            path,
        });
    }

    Ok(spooled)
}
