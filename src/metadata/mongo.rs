//! MongoDB-backed metadata store.
//!
//! Records live in one collection using the field names the service has
//! always written (`fileName`, `s3Key`, `s3Url`, `fileType`, `fileSize`
//! in megabytes, mongoose-style `createdAt`/`updatedAt`), so documents
//! created before this implementation remain readable.  `sizeBytes` is
//! added alongside `fileSize` to keep the exact payload length.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime};
use mongodb::{Client, Collection, Database};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::store::{now_millis, FileRecord, MetadataStore, NewFileRecord};
use crate::config::MongoConfig;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Document shape stored in the collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDocument {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub file_name: String,
    pub s3_key: String,
    pub s3_url: String,
    pub file_type: String,
    /// Size in megabytes.
    pub file_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

fn to_bson_time(dt: &DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

fn from_bson_time(dt: BsonDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default()
}

impl FileDocument {
    fn from_record(record: &FileRecord) -> anyhow::Result<Self> {
        Ok(Self {
            id: ObjectId::parse_str(&record.id)?,
            file_name: record.file_name.clone(),
            s3_key: record.storage_key.clone(),
            s3_url: record.access_url.clone(),
            file_type: record.content_type.clone(),
            file_size: record.size_bytes as f64 / BYTES_PER_MB,
            size_bytes: Some(i64::try_from(record.size_bytes)?),
            created_at: to_bson_time(&record.created_at),
            updated_at: to_bson_time(&record.updated_at),
        })
    }

    fn into_record(self) -> FileRecord {
        // Older documents only carry fileSize in megabytes.
        let size_bytes = match self.size_bytes {
            Some(bytes) => u64::try_from(bytes).unwrap_or_default(),
            None => (self.file_size * BYTES_PER_MB).round().max(0.0) as u64,
        };
        FileRecord {
            id: self.id.to_hex(),
            file_name: self.file_name,
            storage_key: self.s3_key,
            access_url: self.s3_url,
            content_type: self.file_type,
            size_bytes,
            created_at: from_bson_time(self.created_at),
            updated_at: from_bson_time(self.updated_at),
        }
    }
}

/// Metadata store backed by a MongoDB collection.
pub struct MongoMetadataStore {
    db: Database,
    files: Collection<FileDocument>,
}

impl MongoMetadataStore {
    /// Connect using the configured URL. The driver connects lazily, so
    /// an unreachable server surfaces on the first operation (or `ping`).
    pub async fn connect(config: &MongoConfig) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(&config.url).await?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(&config.database));
        let files = db.collection::<FileDocument>(&config.collection);
        info!(
            database = %db.name(),
            collection = %config.collection,
            "MongoDB metadata store initialized"
        );
        Ok(Self { db, files })
    }
}

impl MetadataStore for MongoMetadataStore {
    fn insert(
        &self,
        record: NewFileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>> {
        Box::pin(async move {
            let record = record.into_record(ObjectId::new().to_hex(), now_millis());
            let document = FileDocument::from_record(&record)?;
            self.files.insert_one(document).await?;
            Ok(record)
        })
    }

    fn find_by_id(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            let oid = ObjectId::parse_str(&id)?;
            let document = self.files.find_one(doc! { "_id": oid }).await?;
            Ok(document.map(FileDocument::into_record))
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.db.run_command(doc! { "ping": 1 }).await?;
            Ok(())
        })
    }
}
