//! Clipboard module
//!
//! Provides clipboard capture and history tracking.
//!
//! - `source`: where clipboard reads and the change counter come from
//! - `classifier`: turns raw reads into typed, hashed payloads (or rejects them)
//! - `filter`: excluded applications and secret detection used by the classifier
//! - `history`: deduplicated, capacity-bounded, persisted history
//! - `scheduler`: background polling loop with pause/resume

pub mod classifier;
pub mod filter;
pub mod history;
pub mod scheduler;
pub mod source;

pub use classifier::{ClassifierConfig, PayloadClassifier, StoreTypes, WhitespacePolicy};
pub use history::{HistoryConfig, HistorySnapshot, HistoryStore};
pub use scheduler::{CaptureScheduler, SchedulerState, SleepWakeObserver};
pub use source::{ClipboardSource, MemoryClipboard};

#[cfg(feature = "system-clipboard")]
pub use source::SystemClipboard;
