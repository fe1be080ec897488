//! Repository doubles for failure-path tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use super::{InMemoryRepository, Repository, StorageError, StorageResult, StoredRecord, WriteBatch};
use crate::shared::types::RecordKey;

/// In-memory repository whose writes can be made to fail or stall
pub(crate) struct FlakyRepository<R> {
    inner: InMemoryRepository<R>,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl<R: StoredRecord> FlakyRepository<R> {
    pub(crate) fn new() -> Self {
        Self {
            inner: InMemoryRepository::new(),
            fail_writes: AtomicBool::new(false),
            write_delay_ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn stored(&self) -> Vec<R> {
        self.inner.load_all().unwrap_or_default()
    }
}

impl<R: StoredRecord> Repository<R> for FlakyRepository<R> {
    fn get(&self, key: &RecordKey) -> StorageResult<Option<R>> {
        self.inner.get(key)
    }

    fn scan(&self, offset: usize, limit: usize) -> StorageResult<Vec<R>> {
        self.inner.scan(offset, limit)
    }

    fn apply(&self, batch: &WriteBatch<R>) -> StorageResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected write failure".to_string()));
        }
        self.inner.apply(batch)
    }
}
