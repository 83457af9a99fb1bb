//! In-memory storage backend.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>`.  Signed URLs
//! are minted locally in an S3-like query-string shape and authenticated
//! with HMAC-SHA256 over bucket, key, signing time and lifetime, so
//! [`MemoryBackend::resolve_signed`] can verify a URL and recover the key
//! it grants access to.
//!
//! Used for tests and for running the service without cloud credentials.
//! In the latter case the server mounts `GET /objects/...`, which serves
//! objects through exactly these URLs, so `memory.base_url` must point at
//! the server's own `/objects` path.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::backend::{StorageBackend, StorageError, StorageFuture};
use crate::config::MemoryStorageConfig;

type HmacSha256 = Hmac<Sha256>;

/// Characters left unescaped inside a key path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Timestamp layout used in `X-Amz-Date`.
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A stored object plus the content type it was written with.
#[derive(Debug, Clone)]
pub struct MemoryObject {
    /// Raw bytes of the object.
    pub data: Bytes,
    /// MIME type supplied at write time.
    pub content_type: String,
}

/// In-memory storage backend.
pub struct MemoryBackend {
    /// storage_key -> object.
    objects: tokio::sync::RwLock<HashMap<String, MemoryObject>>,
    /// Prefix of every signed URL.
    base_url: String,
    /// Bucket name embedded in signed URLs.
    bucket: String,
    /// HMAC key.
    secret: Vec<u8>,
    /// Number of `put` calls (including failed ones).
    puts: AtomicUsize,
    /// Number of `presign_get` calls.
    presigns: AtomicUsize,
    /// When set, every `put` fails with a backend error.
    fail_puts: AtomicBool,
    /// When set, every `presign_get` fails with a backend error.
    fail_presigns: AtomicBool,
    /// When set, every `delete` fails with a backend error.
    fail_deletes: AtomicBool,
}

impl MemoryBackend {
    /// Create a backend from its config section.
    pub fn new(config: &MemoryStorageConfig) -> Self {
        Self {
            objects: tokio::sync::RwLock::new(HashMap::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            secret: config.signing_secret.as_bytes().to_vec(),
            puts: AtomicUsize::new(0),
            presigns: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            fail_presigns: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Bucket name embedded in this backend's URLs.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// A backend for a different bucket sharing this one's URL base and key.
    pub fn with_bucket(&self, bucket: &str) -> Self {
        Self::new(&MemoryStorageConfig {
            base_url: self.base_url.clone(),
            bucket: bucket.to_string(),
            signing_secret: String::from_utf8_lossy(&self.secret).into_owned(),
        })
    }

    /// Make subsequent `put` calls fail (simulates an upstream outage).
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `presign_get` calls fail.
    pub fn set_fail_presigns(&self, fail: bool) {
        self.fail_presigns.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `delete` calls fail.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of `put` calls seen so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `presign_get` calls seen so far.
    pub fn presign_count(&self) -> usize {
        self.presigns.load(Ordering::SeqCst)
    }

    /// Store `data` at `storage_key`, replacing any previous object.
    pub async fn insert(&self, storage_key: &str, data: Bytes, content_type: &str) {
        self.objects.write().await.insert(
            storage_key.to_string(),
            MemoryObject {
                data,
                content_type: content_type.to_string(),
            },
        );
    }

    /// Fetch a stored object.
    pub async fn get(&self, storage_key: &str) -> Option<MemoryObject> {
        self.objects.read().await.get(storage_key).cloned()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn signature(&self, key: &str, amz_date: &str, expires_secs: u64) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(self.bucket.as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(amz_date.as_bytes());
        mac.update(b"\n");
        mac.update(expires_secs.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Build a signed URL for `key` as of `signed_at`.
    pub fn sign_url(&self, key: &str, expires_in: Duration, signed_at: DateTime<Utc>) -> String {
        let amz_date = signed_at.format(AMZ_DATE_FORMAT).to_string();
        let expires_secs = expires_in.as_secs();
        let signature = self.signature(key, &amz_date, expires_secs);
        let path = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}/{}?X-Amz-Date={}&X-Amz-Expires={}&X-Amz-Signature={}",
            self.base_url, self.bucket, path, amz_date, expires_secs, signature
        )
    }

    /// Verify a full URL produced by [`sign_url`](Self::sign_url) and
    /// return the storage key it grants access to.
    pub fn resolve_url(&self, url: &str, now: DateTime<Utc>) -> Option<String> {
        let rest = url.strip_prefix(&self.base_url)?;
        let (path, query) = rest.split_once('?')?;
        self.resolve_signed(path, query, now)
    }

    /// Verify the parts of a signed URL that follow `base_url`:
    /// `path` is `/<bucket>/<encoded key>` and `query` the raw query string.
    ///
    /// Returns `None` if the URL belongs to another bucket, was tampered
    /// with, or is expired at `now`.
    pub fn resolve_signed(&self, path: &str, query: &str, now: DateTime<Utc>) -> Option<String> {
        let encoded_key = path
            .strip_prefix('/')?
            .strip_prefix(self.bucket.as_str())?
            .strip_prefix('/')?;
        let key = percent_decode_str(encoded_key)
            .decode_utf8()
            .ok()?
            .into_owned();

        let mut amz_date = None;
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=')? {
                ("X-Amz-Date", v) => amz_date = Some(v),
                ("X-Amz-Expires", v) => expires = v.parse::<u64>().ok(),
                ("X-Amz-Signature", v) => signature = Some(v),
                _ => {}
            }
        }
        let (amz_date, expires, signature) = (amz_date?, expires?, signature?);

        if self.signature(&key, amz_date, expires) != signature {
            return None;
        }

        let signed_at = NaiveDateTime::parse_from_str(amz_date, AMZ_DATE_FORMAT)
            .ok()?
            .and_utc();
        let lifetime = chrono::TimeDelta::try_seconds(i64::try_from(expires).ok()?)?;
        let deadline = signed_at.checked_add_signed(lifetime)?;
        if now > deadline {
            return None;
        }
        Some(key)
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&self, storage_key: &str, source: &Path, content_type: &str) -> StorageFuture<'_, ()> {
        let storage_key = storage_key.to_string();
        let source: PathBuf = source.to_path_buf();
        let content_type = content_type.to_string();
        Box::pin(async move {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(StorageError::Backend(anyhow::anyhow!(
                    "memory backend: simulated put failure for {storage_key}"
                )));
            }
            let data = tokio::fs::read(&source).await.map_err(|e| {
                anyhow::anyhow!("memory backend: failed to read {}: {e}", source.display())
            })?;
            self.insert(&storage_key, Bytes::from(data), &content_type)
                .await;
            Ok(())
        })
    }

    fn presign_get(&self, storage_key: &str, expires_in: Duration) -> StorageFuture<'_, String> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            self.presigns.fetch_add(1, Ordering::SeqCst);
            if self.fail_presigns.load(Ordering::SeqCst) {
                return Err(StorageError::Backend(anyhow::anyhow!(
                    "memory backend: simulated presign failure for {storage_key}"
                )));
            }
            if !self.objects.read().await.contains_key(&storage_key) {
                return Err(StorageError::NotFound { key: storage_key });
            }
            Ok(self.sign_url(&storage_key, expires_in, Utc::now()))
        })
    }

    fn delete(&self, storage_key: &str) -> StorageFuture<'_, ()> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(StorageError::Backend(anyhow::anyhow!(
                    "memory backend: simulated delete failure for {storage_key}"
                )));
            }
            self.objects.write().await.remove(&storage_key);
            Ok(())
        })
    }

    fn exists(&self, storage_key: &str) -> StorageFuture<'_, bool> {
        let storage_key = storage_key.to_string();
        Box::pin(async move { Ok(self.objects.read().await.contains_key(&storage_key)) })
    }

    fn probe(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }
}

// -- Tests -------------------------------------------------------------------
