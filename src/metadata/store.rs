//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses `async_trait`-style methods (manual desugaring with pinned
//! futures) so the same handlers run against MongoDB, SQLite, or the
//! in-memory store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::future::Future;
use std::pin::Pin;

/// Length of a file identifier in hex characters (a 12-byte ObjectId).
pub const FILE_ID_LEN: usize = 24;

// ── Record types ───────────────────────────────────────────────────

/// One uploaded file.
///
/// `storage_key` is the only durable link to the stored object; the
/// `access_url` captured at upload time is advisory and goes stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// 24-character lowercase hex identifier assigned on insert.
    pub id: String,
    /// Sanitized original filename.
    pub file_name: String,
    /// Object storage key.
    pub storage_key: String,
    /// Signed URL minted when the file was uploaded.
    pub access_url: String,
    /// MIME type reported by the uploader.
    pub content_type: String,
    /// Payload length.
    pub size_bytes: u64,
    /// Insert time.
    #[serde(serialize_with = "serialize_iso_millis")]
    pub created_at: DateTime<Utc>,
    /// Last modification time (equal to `created_at`; records are never updated).
    #[serde(serialize_with = "serialize_iso_millis")]
    pub updated_at: DateTime<Utc>,
}

/// The caller-supplied part of a [`FileRecord`].
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub file_name: String,
    pub storage_key: String,
    pub access_url: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl NewFileRecord {
    /// Complete the record with store-assigned fields.
    pub fn into_record(self, id: String, now: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id,
            file_name: self.file_name,
            storage_key: self.storage_key,
            access_url: self.access_url,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Serialize a timestamp as `2024-01-02T03:04:05.678Z`.
pub fn serialize_iso_millis<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Current time truncated to whole milliseconds, the precision every store keeps.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Generate a fresh 24-character lowercase hex identifier.
pub fn new_file_id() -> String {
    hex::encode(rand::random::<[u8; 12]>())
}

/// True when `id` has the shape of a file identifier.
///
/// Anything else cannot name a record and is answered with not-found
/// without a store round trip.
pub fn is_valid_file_id(id: &str) -> bool {
    id.len() == FILE_ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}

// ── Trait ───────────────────────────────────────────────────────────

/// Async metadata store contract.
///
/// Records are created once by the upload flow and only read afterwards;
/// there is no update or delete.
pub trait MetadataStore: Send + Sync + 'static {
    /// Insert a record, assigning its id and timestamps.
    fn insert(
        &self,
        record: NewFileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>>;

    /// Look a record up by id. `id` is always a valid, lowercase file id.
    fn find_by_id(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>>;

    /// Check that the store is reachable.
    fn ping(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file_id_shape() {
        let a = new_file_id();
        let b = new_file_id();
        assert_eq!(a.len(), FILE_ID_LEN);
        assert!(is_valid_file_id(&a));
        assert_eq!(a, a.to_ascii_lowercase());
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_valid_file_id() {
        assert!(is_valid_file_id("000000000000000000000000"));
        assert!(is_valid_file_id("65a1f0c2b3d4e5f60718293a"));
        assert!(is_valid_file_id("65A1F0C2B3D4E5F60718293A"));
        assert!(!is_valid_file_id(""));
        assert!(!is_valid_file_id("123"));
        assert!(!is_valid_file_id("65a1f0c2b3d4e5f60718293g"));
        assert!(!is_valid_file_id("65a1f0c2b3d4e5f60718293a0"));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let record = NewFileRecord {
            file_name: "cat.png".to_string(),
            storage_key: "images/1-cat.png".to_string(),
            access_url: "http://example/x".to_string(),
            content_type: "image/png".to_string(),
            size_bytes: 10,
        }
        .into_record("65a1f0c2b3d4e5f60718293a".to_string(), now);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fileName"], "cat.png");
        assert_eq!(json["storageKey"], "images/1-cat.png");
        assert_eq!(json["sizeBytes"], 10);
        assert_eq!(json["createdAt"], "2023-11-14T22:13:20.123Z");
        assert_eq!(json["createdAt"], json["updatedAt"]);
    }

    #[test]
    fn test_now_millis_has_no_sub_millisecond_part() {
        let now = now_millis();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
