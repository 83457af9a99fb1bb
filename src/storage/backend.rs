//! Abstract storage backend trait.
//!
//! Every storage backend must implement [`StorageBackend`].  The trait
//! covers exactly what the upload and reissue flows need: write an
//! object, mint a time-limited read URL for it, and remove it again when
//! the metadata write that should follow it fails.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a storage backend.
///
/// `NotFound` is tagged so callers can tell a missing object apart from
/// every other upstream failure without knowing the SDK's error shape.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object exists at the key.
    #[error("object not found at storage key: {key}")]
    NotFound { key: String },

    /// Network, auth, quota, or any other backend failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Boxed future returned by every backend method.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Async object storage contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Write the file at `source` to `storage_key` with the given content type.
    ///
    /// Backends read `source` themselves, so callers never hold the whole
    /// upload in memory.
    fn put(&self, storage_key: &str, source: &Path, content_type: &str) -> StorageFuture<'_, ()>;

    /// Return a signed GET URL for `storage_key` valid for `expires_in`.
    ///
    /// Fails with [`StorageError::NotFound`] when the object is absent.
    fn presign_get(&self, storage_key: &str, expires_in: Duration) -> StorageFuture<'_, String>;

    /// Delete the object at `storage_key`. Deleting a missing key is not an error.
    fn delete(&self, storage_key: &str) -> StorageFuture<'_, ()>;

    /// Check whether an object exists at `storage_key`.
    fn exists(&self, storage_key: &str) -> StorageFuture<'_, bool>;

    /// Verify that the bucket is reachable with the configured credentials.
    fn probe(&self) -> StorageFuture<'_, ()>;
}
