//! `GET /api/images/view-image/:id` -- reissue a signed URL for a stored file.
//!
//! The fresh URL is always derived from the record's storage key.  The
//! stored `accessUrl` is never rewritten.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::presign_expiry;
use crate::errors::{ApiError, ErrorBody};
use crate::metadata::store::{is_valid_file_id, serialize_iso_millis};
use crate::metadata::FileRecord;
use crate::metrics::URLS_SIGNED_TOTAL;
use crate::naming::{compressed_variant_key, format_size_mb};
use crate::storage::{StorageBackend, StorageError};
use crate::AppState;

/// A file record as returned to clients, with a freshly signed URL.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub id: String,
    pub file_name: String,
    pub storage_key: String,
    /// Signed at request time.
    pub access_url: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(rename = "sizeMB")]
    pub size_mb: String,
    #[serde(serialize_with = "serialize_iso_millis")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_iso_millis")]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: DateTime<Utc>,
    /// Signed URL of the resized copy, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_url: Option<String>,
}

impl FileView {
    fn new(record: FileRecord, access_url: String, compressed_url: Option<String>) -> Self {
        Self {
            size_mb: format_size_mb(record.size_bytes),
            id: record.id,
            file_name: record.file_name,
            storage_key: record.storage_key,
            access_url,
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            created_at: record.created_at,
            updated_at: record.updated_at,
            compressed_url,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ViewResponse {
    pub success: bool,
    pub file: FileView,
}

#[utoipa::path(
    get,
    path = "/api/images/view-image/{id}",
    tag = "Images",
    operation_id = "ViewImage",
    params(
        ("id" = String, Path, description = "24-character hex file id"),
    ),
    responses(
        (status = 200, description = "Record with a fresh signed URL", body = ViewResponse),
        (status = 404, description = "File not found", body = ErrorBody),
        (status = 500, description = "Stored object missing or upstream failure", body = ErrorBody)
    )
)]
pub async fn view_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ViewResponse>, ApiError> {
    if !is_valid_file_id(&id) {
        info!(file_id = %id, "File not found: malformed id");
        return Err(ApiError::NotFound { id });
    }
    let id = id.to_ascii_lowercase();

    let record = state
        .metadata
        .find_by_id(&id)
        .await
        .map_err(|e| {
            error!(file_id = %id, error = %e, "Metadata lookup failed");
            ApiError::Metadata(e)
        })?
        .ok_or_else(|| {
            info!(file_id = %id, "File not found");
            ApiError::NotFound { id: id.clone() }
        })?;

    let expiry = presign_expiry(&state.config.storage);
    let access_url = state
        .storage
        .presign_get(&record.storage_key, expiry)
        .await
        .map_err(|e| {
            error!(file_id = %id, key = %record.storage_key, error = %e, "Signing view URL failed");
            ApiError::from(e)
        })?;
    counter!(URLS_SIGNED_TOTAL, "operation" => "view").increment(1);

    let compressed_url = match &state.compressed {
        Some(compressed) => sign_compressed(compressed.as_ref(), &record.storage_key, expiry).await,
        None => None,
    };

    Ok(Json(ViewResponse {
        success: true,
        file: FileView::new(record, access_url, compressed_url),
    }))
}

/// Sign the resized variant of `storage_key`, if the resize job produced one.
///
/// The variant is optional, so any failure here only drops `compressedUrl`.
async fn sign_compressed(
    compressed: &dyn StorageBackend,
    storage_key: &str,
    expiry: Duration,
) -> Option<String> {
    let variant = compressed_variant_key(storage_key);
    match compressed.presign_get(&variant, expiry).await {
        Ok(url) => {
            counter!(URLS_SIGNED_TOTAL, "operation" => "compressed").increment(1);
            Some(url)
        }
        Err(StorageError::NotFound { .. }) => {
            debug!(key = %variant, "No compressed variant");
            None
        }
        Err(e) => {
            warn!(key = %variant, error = %e, "Signing compressed URL failed");
            None
        }
    }
}
