use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use super::{Repository, StorageResult, StoredRecord, WriteBatch};
use crate::shared::types::RecordKey;

/// In-memory repository (tests, and engines that should not touch disk)
pub struct InMemoryRepository<R> {
    tables: Mutex<Tables<R>>,
}

struct Tables<R> {
    by_key: HashMap<RecordKey, R>,
    order: BTreeMap<u64, RecordKey>,
}

impl<R: StoredRecord> InMemoryRepository<R> {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                by_key: HashMap::new(),
                order: BTreeMap::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner).by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: StoredRecord> Default for InMemoryRepository<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: StoredRecord> Repository<R> for InMemoryRepository<R> {
    fn get(&self, key: &RecordKey) -> StorageResult<Option<R>> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.by_key.get(key).cloned())
    }

    fn scan(&self, offset: usize, limit: usize) -> StorageResult<Vec<R>> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .order
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|key| tables.by_key.get(key).cloned())
            .collect())
    }

    fn apply(&self, batch: &WriteBatch<R>) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        if batch.is_clear() {
            tables.by_key.clear();
            tables.order.clear();
        }
        for key in batch.deletes() {
            if let Some(old) = tables.by_key.remove(key) {
                tables.order.remove(&old.sequence());
            }
        }
        for record in batch.puts() {
            let key = record.key().clone();
            if let Some(old) = tables.by_key.insert(key.clone(), record.clone()) {
                tables.order.remove(&old.sequence());
            }
            tables.order.insert(record.sequence(), key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::SnippetRecord;
    use chrono::Utc;

    fn snippet(key: &str, sequence: u64) -> SnippetRecord {
        SnippetRecord {
            key: RecordKey::from(key),
            title: key.to_string(),
            content: format!("content {}", key),
            folder_key: None,
            created_at: Utc::now(),
            sequence,
        }
    }

    #[test]
    fn test_scan_is_most_recent_first() {
        let repo = InMemoryRepository::new();
        let mut batch = WriteBatch::new();
        batch.put(snippet("a", 1)).put(snippet("b", 2)).put(snippet("c", 3));
        repo.apply(&batch).unwrap();

        let keys: Vec<_> = repo.scan(0, 10).unwrap().into_iter().map(|s| s.title).collect();
        assert_eq!(keys, vec!["c", "b", "a"]);
        let page: Vec<_> = repo.scan(1, 1).unwrap().into_iter().map(|s| s.title).collect();
        assert_eq!(page, vec!["b"]);
    }

    #[test]
    fn test_put_existing_key_moves_order() {
        let repo = InMemoryRepository::new();
        let mut batch = WriteBatch::new();
        batch.put(snippet("a", 1)).put(snippet("b", 2));
        repo.apply(&batch).unwrap();

        let mut bump = WriteBatch::new();
        bump.put(snippet("a", 3));
        repo.apply(&bump).unwrap();

        let keys: Vec<_> = repo.load_all().unwrap().into_iter().map(|s| s.title).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn test_delete_and_clear() {
        let repo = InMemoryRepository::new();
        let mut batch = WriteBatch::new();
        batch.put(snippet("a", 1)).put(snippet("b", 2));
        repo.apply(&batch).unwrap();

        let mut delete = WriteBatch::new();
        delete.delete(RecordKey::from("a"));
        repo.apply(&delete).unwrap();
        assert!(repo.get(&RecordKey::from("a")).unwrap().is_none());
        assert_eq!(repo.len(), 1);

        repo.apply(&WriteBatch::replace_all(vec![snippet("z", 9)])).unwrap();
        let keys: Vec<_> = repo.load_all().unwrap().into_iter().map(|s| s.title).collect();
        assert_eq!(keys, vec!["z"]);
    }
}
