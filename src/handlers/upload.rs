//! `POST /api/images/upload` -- store one image and register it.

use std::path::Path;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use metrics::counter;
use serde::Serialize;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::presign_expiry;
use crate::errors::{ApiError, ErrorBody};
use crate::metadata::NewFileRecord;
use crate::metrics::{UPLOADS_TOTAL, UPLOAD_BYTES_TOTAL, URLS_SIGNED_TOTAL};
use crate::naming::{format_size_mb, next_storage_key, sanitize_filename, UNKNOWN_FILENAME};
use crate::spool::spool_image;
use crate::AppState;

const NO_FILE_UPLOADED: &str = "No file uploaded";

/// Successful upload.
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub success: bool,
    /// Id of the new metadata record.
    #[serde(rename = "fileId")]
    pub file_id: String,
    /// Signed read URL, valid for the configured expiry.
    #[serde(rename = "fileUrl")]
    pub file_url: String,
    /// Size in MiB with two decimals.
    #[serde(rename = "sizeMB")]
    pub size_mb: String,
}

/// Multipart form accepted by the upload route (documentation only).
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    image: Vec<u8>,
}

#[utoipa::path(
    post,
    path = "/api/images/upload",
    tag = "Images",
    operation_id = "UploadImage",
    request_body(
        content = inline(UploadForm),
        content_type = "multipart/form-data",
        description = "Form with a single file field named `image`"
    ),
    responses(
        (status = 200, description = "Image stored and registered", body = UploadResponse),
        (status = 400, description = "No file uploaded", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody),
        (status = 500, description = "Storage or metadata failure", body = ErrorBody)
    )
)]
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    // A body that is not multipart at all carries no file either.
    let result = match multipart {
        Ok(mut multipart) => store_upload(&state, &mut multipart).await,
        Err(rejection) => {
            warn!(error = %rejection, "Upload rejected: body is not multipart/form-data");
            Err(ApiError::Validation(NO_FILE_UPLOADED.to_string()))
        }
    };
    let status = if result.is_ok() { "success" } else { "error" };
    counter!(UPLOADS_TOTAL, "status" => status).increment(1);
    result.map(Json)
}

async fn store_upload(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<UploadResponse, ApiError> {
    let server = &state.config.server;
    let upload = spool_image(
        multipart,
        Path::new(&server.upload_dir),
        server.max_upload_bytes as u64,
    )
    .await
    .map_err(|e| {
        warn!(error = %e, "Upload rejected while reading the form");
        e
    })?
    .ok_or_else(|| {
        warn!("Upload rejected: no `image` field");
        ApiError::Validation(NO_FILE_UPLOADED.to_string())
    })?;

    let file_name = sanitize_filename(
        upload
            .file_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_FILENAME),
    );
    let storage_key = next_storage_key(&state.config.storage.key_prefix, &file_name);
    let size_bytes = upload.size_bytes;

    state
        .storage
        .put(&storage_key, upload.path(), &upload.content_type)
        .await
        .map_err(|e| {
            error!(key = %storage_key, error = %e, "Storage write failed");
            ApiError::from(e)
        })?;

    let access_url = match state
        .storage
        .presign_get(&storage_key, presign_expiry(&state.config.storage))
        .await
    {
        Ok(url) => url,
        Err(e) => {
            error!(key = %storage_key, error = %e, "Signing upload URL failed");
            discard_orphan(state, &storage_key).await;
            return Err(e.into());
        }
    };
    counter!(URLS_SIGNED_TOTAL, "operation" => "upload").increment(1);

    let record = NewFileRecord {
        file_name,
        storage_key: storage_key.clone(),
        access_url: access_url.clone(),
        content_type: upload.content_type.clone(),
        size_bytes,
    };
    let record = match state.metadata.insert(record).await {
        Ok(record) => record,
        Err(e) => {
            error!(key = %storage_key, error = %e, "Metadata insert failed");
            discard_orphan(state, &storage_key).await;
            return Err(ApiError::Metadata(e));
        }
    };

    upload.close();
    counter!(UPLOAD_BYTES_TOTAL).increment(size_bytes);
    info!(
        file_id = %record.id,
        key = %storage_key,
        size_bytes,
        "Image uploaded"
    );

    Ok(UploadResponse {
        success: true,
        file_id: record.id,
        file_url: access_url,
        size_mb: format_size_mb(size_bytes),
    })
}

/// Remove an object that will never get a metadata record.
async fn discard_orphan(state: &AppState, storage_key: &str) {
    match state.storage.delete(storage_key).await {
        Ok(()) => info!(key = %storage_key, "Removed orphaned object"),
        Err(e) => warn!(key = %storage_key, error = %e, "Failed to remove orphaned object"),
    }
}
