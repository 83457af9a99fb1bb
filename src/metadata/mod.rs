//! Metadata storage layer.
//!
//! The metadata store keeps one record per uploaded file.  The
//! [`store::MetadataStore`] trait defines the interface;
//! [`mongo::MongoMetadataStore`] is the production implementation,
//! [`sqlite::SqliteMetadataStore`] a single-file alternative and
//! [`memory::MemoryMetadataStore`] the test double.

pub mod memory;
pub mod mongo;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use tracing::info;

pub use store::{FileRecord, MetadataStore, NewFileRecord};

use crate::config::MetadataConfig;

/// Open the metadata store selected by `config.engine`.
pub async fn from_config(config: &MetadataConfig) -> anyhow::Result<Arc<dyn MetadataStore>> {
    match config.engine.as_str() {
        "mongodb" => Ok(Arc::new(
            mongo::MongoMetadataStore::connect(&config.mongodb).await?,
        )),
        "sqlite" => {
            let path = &config.sqlite.path;
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = sqlite::SqliteMetadataStore::new(path)?;
            info!("SQLite metadata store initialized at {}", path);
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(memory::MemoryMetadataStore::new())),
        other => anyhow::bail!("unknown metadata engine '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MetadataConfig::default();
        config.engine = "sqlite".to_string();
        config.sqlite.path = dir
            .path()
            .join("nested/meta.db")
            .to_str()
            .unwrap()
            .to_string();

        let store = from_config(&config).await.unwrap();
        store.ping().await.unwrap();
        assert!(dir.path().join("nested/meta.db").exists());
    }

    #[tokio::test]
    async fn test_from_config_unknown_engine() {
        let mut config = MetadataConfig::default();
        config.engine = "redis".to_string();
        assert!(from_config(&config).await.is_err());
    }
}
