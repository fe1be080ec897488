use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::Deserialize;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::{
    decode, encode, Migrate, MigrationReport, Repository, StorageError, StorageResult, StoredRecord,
    WriteBatch,
};
use crate::core::clipboard::classifier::{text_hash, WhitespacePolicy};
use crate::shared::types::{
    CapturedPayload, ClipRecord, PayloadContent, RecordKey, SnippetFolder, SnippetRecord,
};

/// Current on-disk layout.
///
/// - v1: history only, JSON text values keyed by capture time in `clipboard_history`
/// - v2: CBOR records keyed by record key, with a sequence -> key index per table
pub const SCHEMA_VERSION: u64 = 2;

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Redb table definition for engine metadata
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// v1 history table. Key: capture time in millis, Value: JSON item
const LEGACY_HISTORY_TABLE: TableDefinition<u64, &str> = TableDefinition::new("clipboard_history");

fn records_table<R: StoredRecord>() -> TableDefinition<'static, &'static str, &'static [u8]> {
    TableDefinition::new(R::TABLE)
}

fn order_table<R: StoredRecord>() -> TableDefinition<'static, u64, &'static str> {
    TableDefinition::new(R::ORDER_TABLE)
}

/// Redb database shared by every repository
#[derive(Clone)]
pub struct RedbDatabase {
    db: Arc<Database>,
}

impl RedbDatabase {
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("Failed to create data directory: {}", e)))?;
        }
        let db = Database::create(path)
            .map_err(|e| StorageError::Backend(format!("Failed to create database: {}", e)))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn repository<R: StoredRecord>(&self) -> RedbRepository<R> {
        RedbRepository {
            db: Arc::clone(&self.db),
            _record: PhantomData,
        }
    }

    /// Version recorded on disk; 0 for a database never migrated
    pub fn schema_version(&self) -> StorageResult<u64> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(format!("Failed to begin read: {}", e)))?;
        let meta = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(e) => return Err(StorageError::Backend(format!("Failed to open table: {}", e))),
        };
        let version = meta
            .get(SCHEMA_VERSION_KEY)
            .map_err(|e| StorageError::Backend(format!("Failed to read schema version: {}", e)))?
            .map(|v| v.value())
            .unwrap_or(0);
        Ok(version)
    }
}

impl Migrate for RedbDatabase {
    fn migrate(&self) -> StorageResult<MigrationReport> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(format!("Failed to begin write: {}", e)))?;

        let from_version = {
            let meta = write_txn
                .open_table(META_TABLE)
                .map_err(|e| StorageError::Backend(format!("Failed to open table: {}", e)))?;
            let version = meta
                .get(SCHEMA_VERSION_KEY)
                .map_err(|e| StorageError::Backend(format!("Failed to read schema version: {}", e)))?
                .map(|v| v.value())
                .unwrap_or(0);
            version
        };

        if from_version > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchema {
                found: from_version,
                supported: SCHEMA_VERSION,
            });
        }

        let mut imported_records = 0;
        if from_version < 2 {
            create_tables::<ClipRecord>(&write_txn)?;
            create_tables::<SnippetRecord>(&write_txn)?;
            create_tables::<SnippetFolder>(&write_txn)?;
            imported_records = import_legacy_history(&write_txn)?;
        }

        {
            let mut meta = write_txn
                .open_table(META_TABLE)
                .map_err(|e| StorageError::Backend(format!("Failed to open table: {}", e)))?;
            meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)
                .map_err(|e| StorageError::Backend(format!("Failed to write schema version: {}", e)))?;
        }

        write_txn
            .commit()
            .map_err(|e| StorageError::Backend(format!("Failed to commit: {}", e)))?;

        if from_version != SCHEMA_VERSION {
            info!(
                "[Storage] Migrated schema v{} -> v{} ({} legacy records imported)",
                from_version, SCHEMA_VERSION, imported_records
            );
        }

        Ok(MigrationReport {
            from_version,
            to_version: SCHEMA_VERSION,
            imported_records,
        })
    }
}

fn create_tables<R: StoredRecord>(write_txn: &WriteTransaction) -> StorageResult<()> {
    write_txn
        .open_table(records_table::<R>())
        .map_err(|e| StorageError::Backend(format!("Failed to open table: {}", e)))?;
    write_txn
        .open_table(order_table::<R>())
        .map_err(|e| StorageError::Backend(format!("Failed to open table: {}", e)))?;
    Ok(())
}

/// History item as stored by schema v1
#[derive(Deserialize)]
struct LegacyHistoryItem {
    id: String,
    item_type: String,
    content: String,
    timestamp: DateTime<Utc>,
    source_app: Option<String>,
}

/// Move v1 history rows into the v2 clip tables and drop the v1 table.
///
/// v1 image rows carried no recoverable bytes and are skipped.
fn import_legacy_history(write_txn: &WriteTransaction) -> StorageResult<usize> {
    let mut legacy_items = Vec::new();
    {
        let legacy = write_txn
            .open_table(LEGACY_HISTORY_TABLE)
            .map_err(|e| StorageError::Backend(format!("Failed to open table: {}", e)))?;
        let iter = legacy
            .iter()
            .map_err(|e| StorageError::Backend(format!("Failed to create iterator: {}", e)))?;
        for entry in iter {
            let (_, value) =
                entry.map_err(|e| StorageError::Backend(format!("Failed to read entry: {}", e)))?;
            let item: LegacyHistoryItem = serde_json::from_str(value.value())
                .map_err(|e| StorageError::Encoding(format!("Deserialization error: {}", e)))?;
            legacy_items.push(item);
        }
    }

    let mut batch = WriteBatch::new();
    // Table iteration is oldest first, so sequence grows with recency
    for (index, item) in legacy_items.into_iter().enumerate() {
        if item.item_type.eq_ignore_ascii_case("image") || item.content.is_empty() {
            continue;
        }
        batch.put(ClipRecord {
            key: RecordKey::from(item.id),
            payload: CapturedPayload {
                content_hash: text_hash(&item.content, WhitespacePolicy::default()),
                content: PayloadContent::Text { text: item.content },
                source_app: item.source_app,
            },
            created_at: item.timestamp,
            pinned: false,
            sequence: index as u64 + 1,
        });
    }
    let imported = batch.puts().len();
    apply_in(write_txn, &batch)?;

    write_txn
        .delete_table(LEGACY_HISTORY_TABLE)
        .map_err(|e| StorageError::Backend(format!("Failed to drop legacy table: {}", e)))?;
    Ok(imported)
}

fn apply_in<R: StoredRecord>(write_txn: &WriteTransaction, batch: &WriteBatch<R>) -> StorageResult<()> {
    let mut records = write_txn
        .open_table(records_table::<R>())
        .map_err(|e| StorageError::Backend(format!("Failed to open table: {}", e)))?;
    let mut order = write_txn
        .open_table(order_table::<R>())
        .map_err(|e| StorageError::Backend(format!("Failed to open table: {}", e)))?;

    if batch.is_clear() {
        // redb has no drain(), so collect keys and remove them
        let mut keys = Vec::new();
        for entry in records
            .iter()
            .map_err(|e| StorageError::Backend(format!("Failed to iterate: {}", e)))?
        {
            let (key, _) = entry.map_err(|e| StorageError::Backend(format!("Failed to read entry: {}", e)))?;
            keys.push(key.value().to_string());
        }
        for key in keys {
            records
                .remove(key.as_str())
                .map_err(|e| StorageError::Backend(format!("Failed to remove key: {}", e)))?;
        }

        let mut sequences = Vec::new();
        for entry in order
            .iter()
            .map_err(|e| StorageError::Backend(format!("Failed to iterate: {}", e)))?
        {
            let (sequence, _) =
                entry.map_err(|e| StorageError::Backend(format!("Failed to read entry: {}", e)))?;
            sequences.push(sequence.value());
        }
        for sequence in sequences {
            order
                .remove(sequence)
                .map_err(|e| StorageError::Backend(format!("Failed to remove key: {}", e)))?;
        }
    }

    for key in batch.deletes() {
        let removed: Option<R> = records
            .remove(key.as_str())
            .map_err(|e| StorageError::Backend(format!("Failed to remove key: {}", e)))?
            .map(|old| decode(old.value()))
            .transpose()?;
        if let Some(old) = removed {
            order
                .remove(old.sequence())
                .map_err(|e| StorageError::Backend(format!("Failed to remove key: {}", e)))?;
        }
    }

    for record in batch.puts() {
        let bytes = encode(record)?;
        let previous: Option<R> = records
            .insert(record.key().as_str(), bytes.as_slice())
            .map_err(|e| StorageError::Backend(format!("Failed to insert: {}", e)))?
            .map(|old| decode(old.value()))
            .transpose()?;
        if let Some(old) = previous {
            if old.sequence() != record.sequence() {
                order
                    .remove(old.sequence())
                    .map_err(|e| StorageError::Backend(format!("Failed to remove key: {}", e)))?;
            }
        }
        order
            .insert(record.sequence(), record.key().as_str())
            .map_err(|e| StorageError::Backend(format!("Failed to insert: {}", e)))?;
    }

    Ok(())
}

/// Redb-backed repository for one record type
pub struct RedbRepository<R> {
    db: Arc<Database>,
    _record: PhantomData<fn() -> R>,
}

impl<R: StoredRecord> Repository<R> for RedbRepository<R> {
    fn get(&self, key: &RecordKey) -> StorageResult<Option<R>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(format!("Failed to begin read: {}", e)))?;
        let table = match read_txn.open_table(records_table::<R>()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(StorageError::Backend(format!("Failed to open table: {}", e))),
        };
        let value = table
            .get(key.as_str())
            .map_err(|e| StorageError::Backend(format!("Failed to read entry: {}", e)))?;
        value.map(|v| decode(v.value())).transpose()
    }

    fn scan(&self, offset: usize, limit: usize) -> StorageResult<Vec<R>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(format!("Failed to begin read: {}", e)))?;
        let (records, order) = match (
            read_txn.open_table(records_table::<R>()),
            read_txn.open_table(order_table::<R>()),
        ) {
            (Ok(records), Ok(order)) => (records, order),
            (Err(TableError::TableDoesNotExist(_)), _) | (_, Err(TableError::TableDoesNotExist(_))) => {
                return Ok(Vec::new())
            }
            (Err(e), _) | (_, Err(e)) => {
                return Err(StorageError::Backend(format!("Failed to open table: {}", e)))
            }
        };

        let iter = order
            .iter()
            .map_err(|e| StorageError::Backend(format!("Failed to create iterator: {}", e)))?;

        let mut items = Vec::new();
        // Newest first
        for entry in iter.rev().skip(offset).take(limit) {
            let (_, key) = entry.map_err(|e| StorageError::Backend(format!("Failed to read entry: {}", e)))?;
            let value = records
                .get(key.value())
                .map_err(|e| StorageError::Backend(format!("Failed to read entry: {}", e)))?;
            if let Some(value) = value {
                items.push(decode(value.value())?);
            }
        }
        Ok(items)
    }

    fn apply(&self, batch: &WriteBatch<R>) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(format!("Failed to begin write: {}", e)))?;
        apply_in(&write_txn, batch)?;
        write_txn
            .commit()
            .map_err(|e| StorageError::Backend(format!("Failed to commit: {}", e)))?;
        Ok(())
    }
}
