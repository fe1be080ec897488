use std::sync::{Mutex, PoisonError};

use crate::shared::errors::EngineResult;
use crate::shared::types::{ClipboardSnapshot, Representation};

/// Read side of the OS clipboard.
///
/// `change_count` must be cheap and monotonically increasing; the scheduler only calls
/// `read_snapshot` after the counter moves.
pub trait ClipboardSource: Send + Sync {
    fn change_count(&self) -> EngineResult<u64>;
    fn read_snapshot(&self) -> EngineResult<ClipboardSnapshot>;
}

/// Clipboard held in memory, written programmatically.
///
/// Every write bumps the change counter, even when the content is identical, which is how
/// OS pasteboards behave.
#[derive(Default)]
pub struct MemoryClipboard {
    current: Mutex<ClipboardSnapshot>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        self.set(vec![Representation::PlainText(text.into())], None);
    }

    pub fn set(&self, representations: Vec<Representation>, source_app: Option<String>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.change_count += 1;
        current.representations = representations;
        current.source_app = source_app;
    }

    pub fn clear(&self) {
        self.set(Vec::new(), None);
    }
}

impl ClipboardSource for MemoryClipboard {
    fn change_count(&self) -> EngineResult<u64> {
        Ok(self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .change_count)
    }

    fn read_snapshot(&self) -> EngineResult<ClipboardSnapshot> {
        Ok(self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(feature = "system-clipboard")]
pub use system::SystemClipboard;

/// Synthesized change counter for clipboards that expose none.
///
/// The counter advances whenever the content fingerprint differs from the previous one.
#[cfg(any(feature = "system-clipboard", test))]
#[derive(Default)]
struct ChangeTracker {
    last: Option<[u8; 32]>,
    count: u64,
}

#[cfg(any(feature = "system-clipboard", test))]
impl ChangeTracker {
    /// Counter value describing exactly `text`
    fn observe(&mut self, text: &str) -> u64 {
        use sha2::{Digest, Sha256};

        let digest: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        if self.last != Some(digest) {
            self.last = Some(digest);
            self.count += 1;
        }
        self.count
    }
}

#[cfg(feature = "system-clipboard")]
mod system {
    use std::sync::{Mutex, PoisonError};

    use super::{ChangeTracker, ClipboardSource};
    use crate::shared::errors::{EngineError, EngineResult};
    use crate::shared::types::{ClipboardSnapshot, Representation};

    /// Text clipboard via cli-clipboard, with a synthesized change counter.
    #[derive(Default)]
    pub struct SystemClipboard {
        tracker: Mutex<ChangeTracker>,
    }

    impl SystemClipboard {
        pub fn new() -> Self {
            Self::default()
        }

        fn read_text() -> EngineResult<String> {
            cli_clipboard::get_contents().map_err(|e| EngineError::Clipboard(e.to_string()))
        }
    }

    impl ClipboardSource for SystemClipboard {
        fn change_count(&self) -> EngineResult<u64> {
            let text = Self::read_text()?;
            Ok(self
                .tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(&text))
        }

        fn read_snapshot(&self) -> EngineResult<ClipboardSnapshot> {
            // One read: the counter must describe the returned text
            let text = Self::read_text()?;
            let change_count = self
                .tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(&text);
            Ok(ClipboardSnapshot {
                change_count,
                representations: vec![Representation::PlainText(text)],
                source_app: None,
            })
        }
    }
}
