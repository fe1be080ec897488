//! Persistence boundary
//!
//! Stores talk to a typed `Repository<R>` and never to a storage engine directly.
//! Two backends satisfy the contract:
//! - `redb_store`: embedded redb database, CBOR values, ordered sequence index
//! - `memory`: process-local maps, used by tests and ephemeral engines
//!
//! Writes go through `queue::PersistQueue`, a single writer thread with a bounded wait.

pub mod memory;
pub mod queue;
pub mod redb_store;

#[cfg(test)]
pub(crate) mod testing;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::shared::types::{ClipRecord, RecordKey, SnippetFolder, SnippetRecord};

pub use memory::InMemoryRepository;
pub use queue::PersistQueue;
pub use redb_store::{RedbDatabase, RedbRepository, SCHEMA_VERSION};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("write did not complete within {0:?}")]
    Timeout(Duration),

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u64, supported: u64 },

    #[error("persistence writer has shut down")]
    WriterGone,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A record type with a stable key and a recency sequence.
pub trait StoredRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// key -> encoded record
    const TABLE: &'static str;
    /// sequence -> key
    const ORDER_TABLE: &'static str;

    fn key(&self) -> &RecordKey;
    fn sequence(&self) -> u64;
}

impl StoredRecord for ClipRecord {
    const TABLE: &'static str = "clips";
    const ORDER_TABLE: &'static str = "clips_order";

    fn key(&self) -> &RecordKey {
        &self.key
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl StoredRecord for SnippetRecord {
    const TABLE: &'static str = "snippets";
    const ORDER_TABLE: &'static str = "snippets_order";

    fn key(&self) -> &RecordKey {
        &self.key
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl StoredRecord for SnippetFolder {
    const TABLE: &'static str = "snippet_folders";
    const ORDER_TABLE: &'static str = "snippet_folders_order";

    fn key(&self) -> &RecordKey {
        &self.key
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Mutations applied atomically: clear first, then deletes, then puts.
#[derive(Debug, Clone)]
pub struct WriteBatch<R> {
    clear: bool,
    deletes: Vec<RecordKey>,
    puts: Vec<R>,
}

impl<R> Default for WriteBatch<R> {
    fn default() -> Self {
        Self {
            clear: false,
            deletes: Vec::new(),
            puts: Vec::new(),
        }
    }
}

impl<R> WriteBatch<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wipe the table and write exactly `records`
    pub fn replace_all(records: impl IntoIterator<Item = R>) -> Self {
        Self {
            clear: true,
            deletes: Vec::new(),
            puts: records.into_iter().collect(),
        }
    }

    pub fn put(&mut self, record: R) -> &mut Self {
        self.puts.push(record);
        self
    }

    pub fn delete(&mut self, key: RecordKey) -> &mut Self {
        self.deletes.push(key);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.clear = true;
        self
    }

    pub fn is_clear(&self) -> bool {
        self.clear
    }

    pub fn deletes(&self) -> &[RecordKey] {
        &self.deletes
    }

    pub fn puts(&self) -> &[R] {
        &self.puts
    }

    pub fn is_empty(&self) -> bool {
        !self.clear && self.deletes.is_empty() && self.puts.is_empty()
    }
}

impl<R: Clone> WriteBatch<R> {
    /// Batch that turns the `before` table into `after`.
    ///
    /// Records shared by both maps (same `Arc`) are unchanged and skipped.
    pub fn diff(before: &HashMap<RecordKey, Arc<R>>, after: &HashMap<RecordKey, Arc<R>>) -> Self {
        let mut batch = Self::new();
        if after.is_empty() && !before.is_empty() {
            batch.clear();
            return batch;
        }
        for key in before.keys() {
            if !after.contains_key(key) {
                batch.delete(key.clone());
            }
        }
        for (key, record) in after {
            let unchanged = before.get(key).is_some_and(|old| Arc::ptr_eq(old, record));
            if !unchanged {
                batch.put(R::clone(record));
            }
        }
        batch
    }
}

/// Typed repository over one record table
pub trait Repository<R: StoredRecord>: Send + Sync {
    fn get(&self, key: &RecordKey) -> StorageResult<Option<R>>;

    /// Records ordered by descending sequence (most recent first)
    fn scan(&self, offset: usize, limit: usize) -> StorageResult<Vec<R>>;

    fn apply(&self, batch: &WriteBatch<R>) -> StorageResult<()>;

    fn load_all(&self) -> StorageResult<Vec<R>> {
        self.scan(0, usize::MAX)
    }
}

/// Outcome of a startup schema upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u64,
    pub to_version: u64,
    pub imported_records: usize,
}

/// Forward-only schema upgrade, run once before any repository is used.
pub trait Migrate {
    fn migrate(&self) -> StorageResult<MigrationReport>;
}

pub(crate) fn encode<R: Serialize>(record: &R) -> StorageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(record, &mut bytes)
        .map_err(|e| StorageError::Encoding(format!("Serialization error: {}", e)))?;
    Ok(bytes)
}

pub(crate) fn decode<R: DeserializeOwned>(bytes: &[u8]) -> StorageResult<R> {
    ciborium::from_reader(bytes)
        .map_err(|e| StorageError::Encoding(format!("Deserialization error: {}", e)))
}
