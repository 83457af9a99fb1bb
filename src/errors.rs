//! API error types.
//!
//! Every failure a handler can report is an [`ApiError`] variant.  The
//! enum implements [`axum::response::IntoResponse`] so handlers can
//! simply return `Err(ApiError::NotFound { .. })`; the client always gets
//! `{"success": false, "error": "<message>"}` with the matching status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::storage::StorageError;

/// Header carrying the per-response request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Always `false`.
    pub success: bool,
    /// Human-readable message.
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request is missing something required (e.g. the `image` field).
    #[error("{0}")]
    Validation(String),

    /// The body exceeds the configured upload limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// No record with this id.
    #[error("File not found")]
    NotFound { id: String },

    /// A signed object URL failed verification or has expired.
    #[error("Access denied")]
    AccessDenied,

    /// The record exists but its object is gone from storage.
    #[error("Stored object not found")]
    ObjectMissing { key: String },

    /// Object storage failure, message passed through from upstream.
    #[error("{0}")]
    Storage(anyhow::Error),

    /// Metadata store failure, message passed through from upstream.
    #[error("{0}")]
    Metadata(anyhow::Error),

    /// Anything else (temp file I/O, multipart stream errors).
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::AccessDenied => StatusCode::FORBIDDEN,
            ApiError::ObjectMissing { .. }
            | ApiError::Storage(_)
            | ApiError::Metadata(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { key } => ApiError::ObjectMissing { key },
            StorageError::Backend(e) => ApiError::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (
            self.status_code(),
            [(REQUEST_ID_HEADER, generate_request_id())],
            Json(body),
        )
            .into_response()
    }
}
