use std::sync::Arc;
use tracing::{debug, info};

use crate::core::clipboard::HistoryStore;
use crate::core::snippets::SnippetStore;
use crate::shared::errors::{EngineError, EngineResult};
use crate::shared::types::{
    ClipRecord, PasteableContent, PayloadContent, RecordKey, RecordKind, SnippetRecord,
};

/// Key reported when `resolve_latest` finds an empty history
const LATEST_KEY: &str = "latest";

/// Thin facade over the stores for menus and hotkeys.
pub struct ActionGateway {
    history: Arc<HistoryStore>,
    snippets: Arc<SnippetStore>,
    keep_pinned_on_clear: bool,
}

impl ActionGateway {
    pub fn new(
        history: Arc<HistoryStore>,
        snippets: Arc<SnippetStore>,
        keep_pinned_on_clear: bool,
    ) -> Self {
        Self {
            history,
            snippets,
            keep_pinned_on_clear,
        }
    }

    /// Content to hand to the paste collaborator for a menu selection.
    pub fn resolve_for_paste(
        &self,
        key: &RecordKey,
        kind: RecordKind,
    ) -> EngineResult<PasteableContent> {
        let content = match kind {
            RecordKind::History => self.history.get(key)?.payload.content,
            RecordKind::Snippet => PayloadContent::Text {
                text: self.snippets.get(key)?.content,
            },
        };
        Ok(PasteableContent {
            kind,
            key: key.clone(),
            content,
        })
    }

    /// Most recent history record, pinned or not.
    pub fn resolve_latest(&self) -> EngineResult<PasteableContent> {
        let record = self
            .history
            .latest()
            .ok_or_else(|| EngineError::NotFound(RecordKey::from(LATEST_KEY)))?;
        Ok(PasteableContent {
            kind: RecordKind::History,
            key: record.key,
            content: record.payload.content,
        })
    }

    /// Clear the history once the user has confirmed. Unconfirmed requests remove nothing.
    pub fn request_clear_history(&self, confirmed: bool) -> EngineResult<usize> {
        if !confirmed {
            debug!("[ActionGateway] Clear request not confirmed");
            return Ok(0);
        }
        let removed = self.history.clear_all(self.keep_pinned_on_clear)?;
        info!("[ActionGateway] Cleared history ({} records)", removed);
        Ok(removed)
    }

    pub fn toggle_pin(&self, key: &RecordKey) -> EngineResult<bool> {
        self.history.toggle_pin(key)
    }

    pub fn remove(&self, key: &RecordKey, kind: RecordKind) -> EngineResult<()> {
        match kind {
            RecordKind::History => self.history.remove(key).map(|_| ()),
            RecordKind::Snippet => self.snippets.remove(key).map(|_| ()),
        }
    }

    pub fn history(&self, limit: usize, offset: usize) -> Vec<ClipRecord> {
        self.history.list(limit, offset)
    }

    pub fn snippets(&self, limit: usize, offset: usize) -> Vec<SnippetRecord> {
        self.snippets.list(limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clipboard::{HistoryConfig, PayloadClassifier};
    use crate::shared::types::ClipboardSnapshot;
    use crate::storage::{InMemoryRepository, PersistQueue};
    use std::time::Duration;

    fn gateway(keep_pinned: bool) -> ActionGateway {
        let queue = Arc::new(PersistQueue::new(Duration::from_secs(2)).unwrap());
        let history = HistoryStore::open(
            HistoryConfig::default(),
            Arc::new(InMemoryRepository::new()),
            Arc::clone(&queue),
        )
        .unwrap();
        let snippets = SnippetStore::open(
            Arc::new(InMemoryRepository::new()),
            Arc::new(InMemoryRepository::new()),
            queue,
        )
        .unwrap();
        ActionGateway::new(Arc::new(history), Arc::new(snippets), keep_pinned)
    }

    fn capture(gateway: &ActionGateway, text: &str) -> ClipRecord {
        let payload = PayloadClassifier::default()
            .classify(&ClipboardSnapshot::text(1, text))
            .unwrap();
        gateway.history.add(payload).unwrap()
    }

    #[test]
    fn test_resolve_history_and_snippet() {
        let gateway = gateway(true);
        let clip = capture(&gateway, "copied");
        let snippet = gateway.snippets.add("sig", "Regards", None).unwrap();

        let pasted = gateway.resolve_for_paste(&clip.key, RecordKind::History).unwrap();
        assert_eq!(pasted.content, PayloadContent::Text { text: "copied".into() });

        let pasted = gateway.resolve_for_paste(&snippet.key, RecordKind::Snippet).unwrap();
        assert_eq!(pasted.kind, RecordKind::Snippet);
        assert_eq!(pasted.content, PayloadContent::Text { text: "Regards".into() });

        // Keys do not cross stores
        assert!(matches!(
            gateway.resolve_for_paste(&snippet.key, RecordKind::History),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_latest() {
        let gateway = gateway(true);
        assert!(matches!(gateway.resolve_latest(), Err(EngineError::NotFound(_))));

        capture(&gateway, "first");
        let second = capture(&gateway, "second");
        let latest = gateway.resolve_latest().unwrap();
        assert_eq!(latest.key, second.key);
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let gateway = gateway(true);
        let pinned = capture(&gateway, "pinned");
        capture(&gateway, "loose");
        gateway.toggle_pin(&pinned.key).unwrap();

        assert_eq!(gateway.request_clear_history(false).unwrap(), 0);
        assert_eq!(gateway.history(10, 0).len(), 2);

        assert_eq!(gateway.request_clear_history(true).unwrap(), 1);
        assert_eq!(gateway.history(10, 0)[0].key, pinned.key);
    }

    #[test]
    fn test_clear_without_keeping_pins() {
        let gateway = gateway(false);
        let pinned = capture(&gateway, "pinned");
        gateway.toggle_pin(&pinned.key).unwrap();
        assert_eq!(gateway.request_clear_history(true).unwrap(), 1);
        assert!(gateway.history(10, 0).is_empty());
    }

    #[test]
    fn test_remove_by_kind() {
        let gateway = gateway(true);
        let clip = capture(&gateway, "copied");
        let snippet = gateway.snippets.add("t", "c", None).unwrap();

        assert!(gateway.remove(&clip.key, RecordKind::Snippet).is_err());
        gateway.remove(&clip.key, RecordKind::History).unwrap();
        gateway.remove(&snippet.key, RecordKind::Snippet).unwrap();
        assert!(gateway.history(10, 0).is_empty());
        assert!(gateway.snippets(10, 0).is_empty());
    }
}
