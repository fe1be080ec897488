//! Snippet store
//!
//! User-authored text entries, optionally grouped into folders. Snippets are listed in
//! creation order and are never evicted or deduplicated. Persistence follows the history
//! store: a writer lock, copy-on-write state and one queued write per mutation.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::shared::errors::{EngineError, EngineResult};
use crate::shared::types::{RecordKey, SnippetFolder, SnippetRecord};
use crate::storage::{PersistQueue, Repository, WriteBatch};

#[derive(Debug, Clone, Default)]
struct SnippetState {
    snippets: HashMap<RecordKey, Arc<SnippetRecord>>,
    /// Creation order
    order: Vec<RecordKey>,
    folders: HashMap<RecordKey, Arc<SnippetFolder>>,
    folder_order: Vec<RecordKey>,
    next_sequence: u64,
}

impl SnippetState {
    fn load(mut snippets: Vec<SnippetRecord>, mut folders: Vec<SnippetFolder>) -> Self {
        snippets.sort_by_key(|s| s.sequence);
        folders.sort_by_key(|f| f.sequence);

        let mut state = Self::default();
        for folder in folders {
            state.next_sequence = state.next_sequence.max(folder.sequence + 1);
            state.folder_order.push(folder.key.clone());
            state.folders.insert(folder.key.clone(), Arc::new(folder));
        }
        for snippet in snippets {
            state.next_sequence = state.next_sequence.max(snippet.sequence + 1);
            state.order.push(snippet.key.clone());
            state.snippets.insert(snippet.key.clone(), Arc::new(snippet));
        }
        state
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn snippet(&self, key: &RecordKey) -> EngineResult<&SnippetRecord> {
        self.snippets
            .get(key)
            .map(Arc::as_ref)
            .ok_or_else(|| EngineError::NotFound(key.clone()))
    }

    fn remove_snippet(&mut self, key: &RecordKey) -> Option<Arc<SnippetRecord>> {
        let snippet = self.snippets.remove(key)?;
        self.order.retain(|k| k != key);
        Some(snippet)
    }

    /// Replace a snippet in place, keeping its position
    fn replace(&mut self, record: SnippetRecord) -> SnippetRecord {
        self.snippets
            .insert(record.key.clone(), Arc::new(record.clone()));
        record
    }

    fn iter(&self) -> impl Iterator<Item = &SnippetRecord> + '_ {
        self.order
            .iter()
            .filter_map(move |key| self.snippets.get(key).map(Arc::as_ref))
    }
}

struct WriterState {
    out_of_sync: bool,
}

pub struct SnippetStore {
    writer: Mutex<WriterState>,
    current: RwLock<Arc<SnippetState>>,
    snippets: Arc<dyn Repository<SnippetRecord>>,
    folders: Arc<dyn Repository<SnippetFolder>>,
    queue: Arc<PersistQueue>,
}

impl SnippetStore {
    pub fn open(
        snippets: Arc<dyn Repository<SnippetRecord>>,
        folders: Arc<dyn Repository<SnippetFolder>>,
        queue: Arc<PersistQueue>,
    ) -> EngineResult<Self> {
        let state = SnippetState::load(snippets.load_all()?, folders.load_all()?);
        info!(
            "[Snippets] Loaded {} snippets in {} folders",
            state.snippets.len(),
            state.folders.len()
        );
        Ok(Self {
            writer: Mutex::new(WriterState { out_of_sync: false }),
            current: RwLock::new(Arc::new(state)),
            snippets,
            folders,
            queue,
        })
    }

    fn state(&self) -> Arc<SnippetState> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn persist(
        &self,
        writer: &mut WriterState,
        before: &SnippetState,
        after: &SnippetState,
    ) -> EngineResult<()> {
        let (snippet_batch, folder_batch) = if writer.out_of_sync {
            (
                WriteBatch::replace_all(after.snippets.values().map(|s| SnippetRecord::clone(s))),
                WriteBatch::replace_all(after.folders.values().map(|f| SnippetFolder::clone(f))),
            )
        } else {
            (
                WriteBatch::diff(&before.snippets, &after.snippets),
                WriteBatch::diff(&before.folders, &after.folders),
            )
        };
        if snippet_batch.is_empty() && folder_batch.is_empty() {
            return Ok(());
        }

        let snippets = Arc::clone(&self.snippets);
        let folders = Arc::clone(&self.folders);
        let result = self.queue.run(move || {
            if !snippet_batch.is_empty() {
                snippets.apply(&snippet_batch)?;
            }
            if !folder_batch.is_empty() {
                folders.apply(&folder_batch)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                writer.out_of_sync = false;
                Ok(())
            }
            Err(err) => {
                // A write spans two tables and may have landed halfway
                writer.out_of_sync = true;
                warn!("[Snippets] Failed to persist change: {}", err);
                Err(err.into())
            }
        }
    }

    fn mutate<T>(
        &self,
        mutation: impl FnOnce(&mut SnippetState) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let before = self.state();
        let mut after = SnippetState::clone(&before);
        let output = mutation(&mut after)?;
        self.persist(&mut writer, &before, &after)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(after);
        Ok(output)
    }

    /// Create a snippet, optionally inside an existing folder.
    pub fn add(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
        folder_key: Option<RecordKey>,
    ) -> EngineResult<SnippetRecord> {
        let (title, content) = (title.into(), content.into());
        let snippet = self.mutate(|state| {
            if let Some(folder) = &folder_key {
                if !state.folders.contains_key(folder) {
                    return Err(EngineError::NotFound(folder.clone()));
                }
            }
            let record = SnippetRecord {
                key: RecordKey::generate(),
                title,
                content,
                folder_key,
                created_at: Utc::now(),
                sequence: state.take_sequence(),
            };
            state.order.push(record.key.clone());
            Ok(state.replace(record))
        })?;
        debug!("[Snippets] Added snippet {}", snippet.key);
        Ok(snippet)
    }

    pub fn get(&self, key: &RecordKey) -> EngineResult<SnippetRecord> {
        self.state().snippet(key).cloned()
    }

    /// Page of snippets in creation order
    pub fn list(&self, limit: usize, offset: usize) -> Vec<SnippetRecord> {
        self.state()
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, key: &RecordKey) -> EngineResult<SnippetRecord> {
        self.mutate(|state| {
            state
                .remove_snippet(key)
                .map(|s| SnippetRecord::clone(&s))
                .ok_or_else(|| EngineError::NotFound(key.clone()))
        })
    }

    pub fn update(&self, key: &RecordKey, content: impl Into<String>) -> EngineResult<SnippetRecord> {
        let content = content.into();
        self.mutate(|state| {
            let mut record = state.snippet(key)?.clone();
            record.content = content;
            Ok(state.replace(record))
        })
    }

    pub fn rename(&self, key: &RecordKey, title: impl Into<String>) -> EngineResult<SnippetRecord> {
        let title = title.into();
        self.mutate(|state| {
            let mut record = state.snippet(key)?.clone();
            record.title = title;
            Ok(state.replace(record))
        })
    }

    pub fn add_folder(&self, title: impl Into<String>) -> EngineResult<SnippetFolder> {
        let title = title.into();
        self.mutate(|state| {
            let folder = SnippetFolder {
                key: RecordKey::generate(),
                title,
                created_at: Utc::now(),
                sequence: state.take_sequence(),
            };
            state.folder_order.push(folder.key.clone());
            state
                .folders
                .insert(folder.key.clone(), Arc::new(folder.clone()));
            Ok(folder)
        })
    }

    /// Folders in creation order
    pub fn folders(&self) -> Vec<SnippetFolder> {
        let state = self.state();
        state
            .folder_order
            .iter()
            .filter_map(|key| state.folders.get(key).map(|f| SnippetFolder::clone(f)))
            .collect()
    }

    /// Remove a folder and every snippet in it. Returns the number of snippets removed.
    pub fn remove_folder(&self, key: &RecordKey) -> EngineResult<usize> {
        let removed = self.mutate(|state| {
            if state.folders.remove(key).is_none() {
                return Err(EngineError::NotFound(key.clone()));
            }
            state.folder_order.retain(|k| k != key);

            let contained: Vec<RecordKey> = state
                .iter()
                .filter(|s| s.folder_key.as_ref() == Some(key))
                .map(|s| s.key.clone())
                .collect();
            for snippet in &contained {
                state.remove_snippet(snippet);
            }
            Ok(contained.len())
        })?;
        info!("[Snippets] Removed folder {} with {} snippets", key, removed);
        Ok(removed)
    }

    pub fn list_in_folder(&self, folder_key: &RecordKey) -> EngineResult<Vec<SnippetRecord>> {
        let state = self.state();
        if !state.folders.contains_key(folder_key) {
            return Err(EngineError::NotFound(folder_key.clone()));
        }
        Ok(state
            .iter()
            .filter(|s| s.folder_key.as_ref() == Some(folder_key))
            .cloned()
            .collect())
    }
}
