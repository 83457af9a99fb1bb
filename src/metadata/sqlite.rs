//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::{new_file_id, now_millis, FileRecord, MetadataStore, NewFileRecord};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the tables if they do not already exist. Safe on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                id            TEXT PRIMARY KEY,
                file_name     TEXT NOT NULL,
                storage_key   TEXT NOT NULL,
                access_url    TEXT NOT NULL,
                content_type  TEXT NOT NULL DEFAULT 'application/octet-stream',
                size_bytes    INTEGER NOT NULL,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_storage_key
                ON files(storage_key);
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, format_timestamp(&Utc::now())],
            )?;
        }

        Ok(())
    }
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let size: i64 = row.get(5)?;
    let created: String = row.get(6)?;
    let updated: String = row.get(7)?;
    Ok(FileRecord {
        id: row.get(0)?,
        file_name: row.get(1)?,
        storage_key: row.get(2)?,
        access_url: row.get(3)?,
        content_type: row.get(4)?,
        size_bytes: u64::try_from(size).unwrap_or_default(),
        created_at: parse_timestamp(6, &created)?,
        updated_at: parse_timestamp(7, &updated)?,
    })
}

impl MetadataStore for SqliteMetadataStore {
    fn insert(
        &self,
        record: NewFileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>> {
        Box::pin(async move {
            let record = record.into_record(new_file_id(), now_millis());
            let size = i64::try_from(record.size_bytes)?;
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO files
                    (id, file_name, storage_key, access_url, content_type, size_bytes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.file_name,
                    record.storage_key,
                    record.access_url,
                    record.content_type,
                    size,
                    format_timestamp(&record.created_at),
                    format_timestamp(&record.updated_at),
                ],
            )?;
            Ok(record)
        })
    }

    fn find_by_id(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let record = conn
                .query_row(
                    "SELECT id, file_name, storage_key, access_url, content_type,
                            size_bytes, created_at, updated_at
                     FROM files WHERE id = ?1",
                    params![id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteMetadataStore {
        SqliteMetadataStore::new(":memory:").expect("failed to create in-memory store")
    }

    fn make_record(name: &str, size: u64) -> NewFileRecord {
        NewFileRecord {
            file_name: name.to_string(),
            storage_key: format!("images/1700000000000-{name}"),
            access_url: format!("http://localhost:3000/objects/picvault/images/{name}"),
            content_type: "image/jpeg".to_string(),
            size_bytes: size,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = test_store();
        let inserted = store.insert(make_record("dog.jpg", 2048)).await.unwrap();

        let found = store.find_by_id(&inserted.id).await.unwrap().unwrap();
        assert_eq!(found, inserted);
        assert_eq!(found.storage_key, "images/1700000000000-dog.jpg");
        assert_eq!(found.size_bytes, 2048);
        assert_eq!(found.created_at, found.updated_at);
    }

    #[tokio::test]
    async fn test_find_missing() {
        let store = test_store();
        assert!(store
            .find_by_id("000000000000000000000000")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_ping() {
        let store = test_store();
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("picvault.db");
        let path = path.to_str().unwrap();

        let id = {
            let store = SqliteMetadataStore::new(path).unwrap();
            store.insert(make_record("a.png", 1)).await.unwrap().id
        };

        let store = SqliteMetadataStore::new(path).unwrap();
        let found = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.file_name, "a.png");
    }

    #[test]
    fn test_init_db_idempotent() {
        let store = test_store();
        store.init_db().unwrap();
        store.init_db().unwrap();

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
