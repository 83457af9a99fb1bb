//! Object storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where image bytes
//! physically live.  [`aws::AwsBackend`] talks to S3 (or any
//! S3-compatible endpoint); [`memory::MemoryBackend`] keeps everything in
//! process and signs its own URLs, which is what the tests run against.

pub mod aws;
pub mod backend;
pub mod memory;

use std::sync::Arc;

pub use backend::{StorageBackend, StorageError};

use crate::config::StorageConfig;

/// The upload bucket plus, when configured, the bucket holding resized copies.
pub struct Backends {
    pub primary: Arc<dyn StorageBackend>,
    pub compressed: Option<Arc<dyn StorageBackend>>,
    /// In-process buckets the server must serve under `/objects`.
    pub local: Vec<Arc<memory::MemoryBackend>>,
}

/// Build the storage backends selected by `config.backend`.
pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Backends> {
    match config.backend.as_str() {
        "aws" => {
            let primary = aws::AwsBackend::new(&config.aws).await?;
            let compressed = (!config.aws.compressed_bucket.is_empty()).then(|| {
                Arc::new(primary.with_bucket(&config.aws.compressed_bucket))
                    as Arc<dyn StorageBackend>
            });
            Ok(Backends {
                primary: Arc::new(primary),
                compressed,
                local: Vec::new(),
            })
        }
        "memory" => {
            let primary = Arc::new(memory::MemoryBackend::new(&config.memory));
            Ok(Backends {
                primary: primary.clone(),
                compressed: None,
                local: vec![primary],
            })
        }
        other => anyhow::bail!("unknown storage backend '{other}'"),
    }
}
