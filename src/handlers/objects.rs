//! `GET /objects/{bucket}/{key}` -- serve objects held by the in-process
//! storage backend through the signed URLs it hands out.
//!
//! Only mounted when the memory backend is selected; with S3 the signed
//! URLs point at the bucket directly.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, Uri};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::ApiError;
use crate::AppState;

/// Path the memory backend's `base_url` must end in.
pub const OBJECTS_ROUTE: &str = "/objects";

pub async fn get_object(
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> Result<Response, ApiError> {
    let path = uri.path().strip_prefix(OBJECTS_ROUTE).unwrap_or_default();
    let query = uri.query().unwrap_or_default();
    let now = Utc::now();

    let (bucket, key) = state
        .local_buckets
        .iter()
        .find_map(|bucket| {
            bucket
                .resolve_signed(path, query, now)
                .map(|key| (bucket, key))
        })
        .ok_or_else(|| {
            warn!(path, "Rejected object URL: bad signature or expired");
            ApiError::AccessDenied
        })?;

    let object = bucket.get(&key).await.ok_or_else(|| {
        info!(bucket = bucket.bucket(), key = %key, "Object not found");
        ApiError::NotFound { id: key.clone() }
    })?;

    debug!(bucket = bucket.bucket(), key = %key, size = object.data.len(), "Serving object");
    Ok(([(header::CONTENT_TYPE, object.content_type)], object.data).into_response())
}
