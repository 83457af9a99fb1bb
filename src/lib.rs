//! picvault library -- image upload service.
//!
//! Accepts single image uploads, stores the bytes in an S3-compatible
//! bucket, records each file in a metadata store, and hands out
//! time-limited signed URLs on upload and on every later lookup.

use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod metadata;
pub mod metrics;
pub mod naming;
pub mod server;
pub mod spool;
pub mod storage;

use crate::config::Config;
use crate::metadata::store::MetadataStore;
use crate::storage::backend::StorageBackend;
use crate::storage::memory::MemoryBackend;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Service configuration.
    pub config: Config,
    /// Metadata store (MongoDB, SQLite or in-memory).
    pub metadata: Arc<dyn MetadataStore>,
    /// Bucket that receives uploads.
    pub storage: Arc<dyn StorageBackend>,
    /// Bucket the resize job writes into, when configured.
    pub compressed: Option<Arc<dyn StorageBackend>>,
    /// In-process buckets whose signed URLs are served under `/objects`.
    pub local_buckets: Vec<Arc<MemoryBackend>>,
}
