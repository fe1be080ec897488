use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::shared::errors::{EngineError, EngineResult};
use crate::shared::settings::HistorySettings;
use crate::shared::types::{CapturedPayload, ClipRecord, ContentHash, RecordKey};
use crate::storage::{PersistQueue, Repository, StorageError, WriteBatch};

/// Bounds applied to non-pinned records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    pub capacity: usize,
    pub max_age: Option<chrono::Duration>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self::from(&HistorySettings::default())
    }
}

impl From<&HistorySettings> for HistoryConfig {
    fn from(settings: &HistorySettings) -> Self {
        Self {
            capacity: settings.capacity,
            max_age: settings
                .max_age_days
                .map(|days| chrono::Duration::days(i64::from(days))),
        }
    }
}

/// Immutable history state. Records are shared between versions; a mutation clones the
/// maps and replaces only the records it touches.
#[derive(Debug, Clone, Default)]
struct HistoryState {
    /// Most recent first
    order: Vec<RecordKey>,
    records: HashMap<RecordKey, Arc<ClipRecord>>,
    /// Exactly the non-pinned records
    unpinned_by_hash: HashMap<ContentHash, RecordKey>,
    next_sequence: u64,
}

impl HistoryState {
    fn from_records(records: Vec<ClipRecord>) -> Self {
        let mut state = Self::default();
        for record in records {
            state.next_sequence = state.next_sequence.max(record.sequence + 1);
            if !record.pinned {
                state
                    .unpinned_by_hash
                    .entry(record.content_hash().clone())
                    .or_insert_with(|| record.key.clone());
            }
            state.order.push(record.key.clone());
            state.records.insert(record.key.clone(), Arc::new(record));
        }
        state
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn unpinned_len(&self) -> usize {
        self.unpinned_by_hash.len()
    }

    fn remove(&mut self, key: &RecordKey) -> Option<Arc<ClipRecord>> {
        let record = self.records.remove(key)?;
        self.order.retain(|k| k != key);
        if self.unpinned_by_hash.get(record.content_hash()) == Some(key) {
            self.unpinned_by_hash.remove(record.content_hash());
        }
        Some(record)
    }

    /// Drop non-pinned records shadowed by a more recent record with the same hash
    fn drop_duplicates(&mut self) -> usize {
        let shadowed: Vec<RecordKey> = self
            .records
            .values()
            .filter(|r| !r.pinned && self.unpinned_by_hash.get(r.content_hash()) != Some(&r.key))
            .map(|r| r.key.clone())
            .collect();
        for key in &shadowed {
            self.remove(key);
        }
        shadowed.len()
    }

    fn expire(&mut self, now: DateTime<Utc>, max_age: Option<chrono::Duration>) -> usize {
        let Some(max_age) = max_age else {
            return 0;
        };
        let cutoff = now - max_age;
        let expired: Vec<RecordKey> = self
            .records
            .values()
            .filter(|r| !r.pinned && r.created_at < cutoff)
            .map(|r| r.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Remove least recent non-pinned records until at most `capacity` remain
    fn evict(&mut self, capacity: usize) -> usize {
        let mut evicted = 0;
        while self.unpinned_len() > capacity {
            let oldest = self
                .order
                .iter()
                .rev()
                .find(|key| self.records.get(*key).is_some_and(|r| !r.pinned))
                .cloned();
            match oldest {
                Some(key) => {
                    self.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    fn iter(&self) -> impl Iterator<Item = &ClipRecord> + '_ {
        self.order
            .iter()
            .filter_map(move |key| self.records.get(key).map(Arc::as_ref))
    }
}

/// Point-in-time view of the history, unaffected by later mutations
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    state: Arc<HistoryState>,
}

impl HistorySnapshot {
    /// Records, most recent first
    pub fn iter(&self) -> impl Iterator<Item = &ClipRecord> + '_ {
        self.state.iter()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&ClipRecord> {
        self.state.records.get(key).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.state.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.order.is_empty()
    }
}

struct WriterState {
    /// Disk state unknown after a timed-out write
    out_of_sync: bool,
}

/// Deduplicated, capacity-bounded clipboard history.
///
/// Mutations are serialized by the writer lock and persisted as one batch before the new
/// state is published. Readers clone an `Arc` of the published state and never block on I/O.
pub struct HistoryStore {
    config: HistoryConfig,
    writer: Mutex<WriterState>,
    current: RwLock<Arc<HistoryState>>,
    repository: Arc<dyn Repository<ClipRecord>>,
    queue: Arc<PersistQueue>,
}

impl HistoryStore {
    /// Load persisted records, dropping duplicates and anything over the bounds.
    pub fn open(
        config: HistoryConfig,
        repository: Arc<dyn Repository<ClipRecord>>,
        queue: Arc<PersistQueue>,
    ) -> EngineResult<Self> {
        let loaded = HistoryState::from_records(repository.load_all()?);

        let mut cleaned = loaded.clone();
        let duplicates = cleaned.drop_duplicates();
        let expired = cleaned.expire(Utc::now(), config.max_age);
        let evicted = cleaned.evict(config.capacity);

        let store = Self {
            config,
            writer: Mutex::new(WriterState { out_of_sync: false }),
            current: RwLock::new(Arc::new(loaded.clone())),
            repository,
            queue,
        };

        if duplicates + expired + evicted > 0 {
            info!(
                "[ClipboardHistory] Startup cleanup: {} duplicate, {} expired, {} evicted",
                duplicates, expired, evicted
            );
            let mut writer = store.writer.lock().unwrap_or_else(PoisonError::into_inner);
            store.persist(&mut writer, &loaded, &cleaned)?;
        }
        store.publish(cleaned);

        info!("[ClipboardHistory] Loaded {} records", store.len());
        Ok(store)
    }

    pub fn config(&self) -> HistoryConfig {
        self.config
    }

    fn state(&self) -> Arc<HistoryState> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, state: HistoryState) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(state);
    }

    /// Write `after` to storage, resynchronizing the whole table if a previous write timed out.
    fn persist(
        &self,
        writer: &mut WriterState,
        before: &HistoryState,
        after: &HistoryState,
    ) -> EngineResult<()> {
        let batch = if writer.out_of_sync {
            WriteBatch::replace_all(after.records.values().map(|r| ClipRecord::clone(r)))
        } else {
            WriteBatch::diff(&before.records, &after.records)
        };
        if batch.is_empty() {
            return Ok(());
        }

        let repository = Arc::clone(&self.repository);
        match self.queue.run(move || repository.apply(&batch)) {
            Ok(()) => {
                if writer.out_of_sync {
                    info!("[ClipboardHistory] Storage resynchronized");
                }
                writer.out_of_sync = false;
                Ok(())
            }
            Err(err) => {
                if matches!(err, StorageError::Timeout(_)) {
                    writer.out_of_sync = true;
                }
                warn!("[ClipboardHistory] Failed to persist change: {}", err);
                Err(err.into())
            }
        }
    }

    /// Apply `mutation` to a copy of the current state, persist, then publish.
    fn mutate<T>(
        &self,
        mutation: impl FnOnce(&mut HistoryState) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let before = self.state();
        let mut after = HistoryState::clone(&before);
        let output = mutation(&mut after)?;
        self.persist(&mut writer, &before, &after)?;
        self.publish(after);
        Ok(output)
    }

    /// Record a capture, or move the matching non-pinned record to the front.
    pub fn add(&self, payload: CapturedPayload) -> EngineResult<ClipRecord> {
        let config = self.config;
        let record = self.mutate(|state| {
            let now = Utc::now();
            let sequence = state.take_sequence();
            let hash = payload.content_hash.clone();

            let record = match state.unpinned_by_hash.get(&hash).cloned() {
                Some(key) => {
                    state.order.retain(|k| k != &key);
                    ClipRecord {
                        key,
                        payload,
                        created_at: now,
                        pinned: false,
                        sequence,
                    }
                }
                None => ClipRecord {
                    key: RecordKey::generate(),
                    payload,
                    created_at: now,
                    pinned: false,
                    sequence,
                },
            };

            state.order.insert(0, record.key.clone());
            state.unpinned_by_hash.insert(hash, record.key.clone());
            state
                .records
                .insert(record.key.clone(), Arc::new(record.clone()));

            state.expire(now, config.max_age);
            state.evict(config.capacity);
            Ok(record)
        })?;

        debug!(
            "[ClipboardHistory] Stored {:?} record {}",
            record.payload.kind(),
            record.key
        );
        Ok(record)
    }

    pub fn get(&self, key: &RecordKey) -> EngineResult<ClipRecord> {
        self.state()
            .records
            .get(key)
            .map(|r| ClipRecord::clone(r))
            .ok_or_else(|| EngineError::NotFound(key.clone()))
    }

    /// Page of records, most recent first
    pub fn list(&self, limit: usize, offset: usize) -> Vec<ClipRecord> {
        self.state()
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            state: self.state(),
        }
    }

    pub fn latest(&self) -> Option<ClipRecord> {
        self.state().iter().next().cloned()
    }

    pub fn len(&self) -> usize {
        self.state().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unpinned_len(&self) -> usize {
        self.state().unpinned_len()
    }

    pub fn remove(&self, key: &RecordKey) -> EngineResult<ClipRecord> {
        self.mutate(|state| {
            state
                .remove(key)
                .map(|r| ClipRecord::clone(&r))
                .ok_or_else(|| EngineError::NotFound(key.clone()))
        })
    }

    /// Remove every record (or every non-pinned one). Returns how many were removed.
    pub fn clear_all(&self, keep_pinned: bool) -> EngineResult<usize> {
        let removed = self.mutate(|state| {
            let doomed: Vec<RecordKey> = state
                .records
                .values()
                .filter(|r| !(keep_pinned && r.pinned))
                .map(|r| r.key.clone())
                .collect();
            for key in &doomed {
                state.remove(key);
            }
            Ok(doomed.len())
        })?;
        info!("[ClipboardHistory] Cleared {} records", removed);
        Ok(removed)
    }

    /// Flip the pinned flag; returns the new state.
    ///
    /// Unpinning a record whose hash is already held by another non-pinned record keeps only
    /// the more recent of the two.
    pub fn toggle_pin(&self, key: &RecordKey) -> EngineResult<bool> {
        let capacity = self.config.capacity;
        self.mutate(|state| {
            let current = state
                .records
                .get(key)
                .ok_or_else(|| EngineError::NotFound(key.clone()))?;
            let mut record = ClipRecord::clone(current);
            record.pinned = !record.pinned;
            let hash = record.content_hash().clone();

            if record.pinned {
                if state.unpinned_by_hash.get(&hash) == Some(key) {
                    state.unpinned_by_hash.remove(&hash);
                }
                state.records.insert(key.clone(), Arc::new(record));
                return Ok(true);
            }

            if let Some(other) = state.unpinned_by_hash.get(&hash).cloned() {
                let other_sequence = state.records.get(&other).map_or(0, |r| r.sequence);
                if other_sequence > record.sequence {
                    debug!("[ClipboardHistory] Unpinned record {} merged into {}", key, other);
                    state.remove(key);
                    return Ok(false);
                }
                state.remove(&other);
            }

            state.unpinned_by_hash.insert(hash, key.clone());
            state.records.insert(key.clone(), Arc::new(record));
            state.evict(capacity);
            Ok(false)
        })
    }

    /// Remove non-pinned records older than the configured maximum age.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        if self.config.max_age.is_none() {
            return Ok(0);
        }
        let max_age = self.config.max_age;
        let purged = self.mutate(|state| Ok(state.expire(now, max_age)))?;
        if purged > 0 {
            info!("[ClipboardHistory] Purged {} expired records", purged);
        }
        Ok(purged)
    }
}
