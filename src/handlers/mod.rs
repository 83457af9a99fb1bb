//! HTTP handlers for the `/api/images` routes and the local object route.

pub mod objects;
pub mod upload;
pub mod view;

use std::time::Duration;

use crate::config::StorageConfig;

/// Lifetime of every signed read URL.
pub(crate) fn presign_expiry(storage: &StorageConfig) -> Duration {
    Duration::from_secs(storage.presign_expiry_secs)
}
