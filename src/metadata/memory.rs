//! In-memory metadata store.
//!
//! Stores all records in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<HashMap>` for thread-safe access.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use super::store::{new_file_id, now_millis, FileRecord, MetadataStore, NewFileRecord};

pub struct MemoryMetadataStore {
    records: RwLock<HashMap<String, FileRecord>>,
    /// Number of `find_by_id` calls.
    lookups: AtomicUsize,
    /// When set, `insert` fails (simulates a database outage).
    fail_inserts: AtomicBool,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
            fail_inserts: AtomicBool::new(false),
        }
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn insert(
        &self,
        record: NewFileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_inserts.load(Ordering::SeqCst) {
                anyhow::bail!("memory metadata store: simulated insert failure");
            }
            let mut records = self.records.write().expect("rwlock poisoned");
            let mut id = new_file_id();
            while records.contains_key(&id) {
                id = new_file_id();
            }
            let record = record.into_record(id.clone(), now_millis());
            records.insert(id, record.clone());
            Ok(record)
        })
    }

    fn find_by_id(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let records = self.records.read().expect("rwlock poisoned");
            Ok(records.get(&id).cloned())
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move { Ok(()) })
    }
}
