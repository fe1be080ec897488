use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::classifier::PayloadClassifier;
use super::history::HistoryStore;
use super::source::ClipboardSource;
use crate::shared::errors::{EngineError, EngineResult};
use crate::shared::types::CapturedPayload;

/// Read failures logged individually before switching to every tenth
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// System sleep/wake notifications, delivered by the host application.
#[async_trait]
pub trait SleepWakeObserver: Send + Sync {
    async fn on_will_sleep(&self);
    async fn on_did_wake(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Stopped,
    Running,
    Paused,
}

struct TickState {
    phase: SchedulerState,
    /// Watermark: last change counter acted upon
    last_seen: Option<u64>,
    /// Classified capture whose persistence failed
    pending: Option<CapturedPayload>,
    consecutive_errors: u32,
}

struct Shared {
    source: Arc<dyn ClipboardSource>,
    classifier: PayloadClassifier,
    history: Arc<HistoryStore>,
    /// Held for a whole tick, so pause and stop never land mid-tick
    tick: tokio::sync::Mutex<TickState>,
}

impl Shared {
    async fn poll_once(&self, state: &mut TickState) {
        if state.phase != SchedulerState::Running {
            return;
        }

        let count = match self.read_change_count().await {
            Ok(count) => count,
            Err(e) => {
                self.record_read_error(state, &e.to_string());
                return;
            }
        };
        if state.consecutive_errors > 0 {
            info!(
                "[ClipboardMonitor] Clipboard readable again after {} errors",
                state.consecutive_errors
            );
            state.consecutive_errors = 0;
        }

        match state.last_seen {
            None => {
                state.last_seen = Some(count);
                return;
            }
            Some(seen) if seen == count => {
                self.persist_pending(state).await;
                return;
            }
            Some(_) => {}
        }

        let source = Arc::clone(&self.source);
        let snapshot = match tokio::task::spawn_blocking(move || source.read_snapshot()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                self.record_read_error(state, &e.to_string());
                return;
            }
            Err(e) => {
                error!("[ClipboardMonitor] Clipboard read task failed: {}", e);
                return;
            }
        };

        debug!("[ClipboardMonitor] Detected clipboard change ({})", count);
        // Counter read before the snapshot; a copy landing mid-read shows up next tick
        state.last_seen = Some(count);

        match self.classifier.classify(&snapshot) {
            Ok(payload) => {
                if state.pending.is_some() {
                    debug!("[ClipboardMonitor] Pending capture superseded");
                }
                state.pending = Some(payload);
                self.persist_pending(state).await;
            }
            Err(reason) => {
                debug!("[ClipboardMonitor] Skipping clipboard change: {}", reason);
            }
        }
    }

    async fn read_change_count(&self) -> EngineResult<u64> {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || source.change_count())
            .await
            .map_err(|e| EngineError::Clipboard(format!("Clipboard read task failed: {}", e)))?
    }

    async fn persist_pending(&self, state: &mut TickState) {
        let Some(payload) = state.pending.clone() else {
            return;
        };
        let history = Arc::clone(&self.history);
        match tokio::task::spawn_blocking(move || history.add(payload)).await {
            Ok(Ok(record)) => {
                state.pending = None;
                debug!("[ClipboardMonitor] Captured record {}", record.key);
            }
            Ok(Err(e)) => {
                warn!("[ClipboardMonitor] Capture not saved, will retry: {}", e);
            }
            Err(e) => {
                error!("[ClipboardMonitor] History task failed: {}", e);
            }
        }
    }

    fn record_read_error(&self, state: &mut TickState, message: &str) {
        state.consecutive_errors += 1;
        let errors = state.consecutive_errors;

        // Only log errors occasionally to avoid spam
        if errors == 1 || errors % MAX_CONSECUTIVE_ERRORS == 0 {
            warn!(
                "[ClipboardMonitor] Failed to read clipboard (error #{}): {}",
                errors, message
            );
        }
        if errors == MAX_CONSECUTIVE_ERRORS {
            warn!("[ClipboardMonitor] Too many consecutive errors, logging every tenth failure");
        }
    }
}

struct Task {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls the clipboard source on a fixed interval and feeds new payloads into the history.
///
/// States: `Stopped -> Running <-> Paused -> Stopped`.
pub struct CaptureScheduler {
    shared: Arc<Shared>,
    interval: Duration,
    task: Mutex<Option<Task>>,
}

impl CaptureScheduler {
    pub fn new(
        source: Arc<dyn ClipboardSource>,
        classifier: PayloadClassifier,
        history: Arc<HistoryStore>,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                classifier,
                history,
                tick: tokio::sync::Mutex::new(TickState {
                    phase: SchedulerState::Stopped,
                    last_seen: None,
                    pending: None,
                    consecutive_errors: 0,
                }),
            }),
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn state(&self) -> SchedulerState {
        self.shared.tick.lock().await.phase
    }

    /// Begin polling. Content already on the clipboard is not captured.
    pub async fn start(&self) {
        let mut state = self.shared.tick.lock().await;
        if state.phase != SchedulerState::Stopped {
            debug!("[ClipboardMonitor] Already started");
            return;
        }

        state.last_seen = self.shared.read_change_count().await.ok();
        state.consecutive_errors = 0;
        state.phase = SchedulerState::Running;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let mut state = shared.tick.lock().await;
                        shared.poll_once(&mut state).await;
                    }
                }
            }
            debug!("[ClipboardMonitor] Polling task exited");
        });

        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Task { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
            previous.handle.abort();
        }
        info!("[ClipboardMonitor] Started monitoring every {:?}", period);
    }

    /// Running -> Paused. Returns once any in-flight tick has finished.
    pub async fn pause(&self) -> SchedulerState {
        let mut state = self.shared.tick.lock().await;
        if state.phase == SchedulerState::Running {
            state.phase = SchedulerState::Paused;
            info!("[ClipboardMonitor] Paused");
        }
        state.phase
    }

    /// Paused -> Running, polling once immediately.
    pub async fn resume(&self) -> SchedulerState {
        let mut state = self.shared.tick.lock().await;
        if state.phase == SchedulerState::Paused {
            state.phase = SchedulerState::Running;
            info!("[ClipboardMonitor] Resumed");
            self.shared.poll_once(&mut state).await;
        }
        state.phase
    }

    /// Any state -> Stopped. Idempotent.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    error!("[ClipboardMonitor] Polling task panicked: {}", e);
                }
            }
        }

        let mut state = self.shared.tick.lock().await;
        if state.phase != SchedulerState::Stopped {
            state.phase = SchedulerState::Stopped;
            info!("[ClipboardMonitor] Stopped");
        }
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

#[async_trait]
impl SleepWakeObserver for CaptureScheduler {
    async fn on_will_sleep(&self) {
        self.pause().await;
    }

    async fn on_did_wake(&self) {
        self.resume().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clipboard::history::HistoryConfig;
    use crate::core::clipboard::source::MemoryClipboard;
    use crate::shared::types::{ClipRecord, ClipboardSnapshot};
    use crate::storage::testing::FlakyRepository;
    use crate::storage::{InMemoryRepository, PersistQueue, Repository};
    use std::sync::atomic::{AtomicBool, Ordering};

    const TICK: Duration = Duration::from_millis(20);

    /// Clipboard whose reads take a while and announce themselves
    struct SlowClipboard {
        inner: MemoryClipboard,
        reading: AtomicBool,
        delay: Duration,
    }

    impl ClipboardSource for SlowClipboard {
        fn change_count(&self) -> EngineResult<u64> {
            self.inner.change_count()
        }

        fn read_snapshot(&self) -> EngineResult<ClipboardSnapshot> {
            self.reading.store(true, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.inner.read_snapshot()
        }
    }

    /// Clipboard whose snapshot counter is read after its content, with a copy landing
    /// between the two reads
    struct LaggingClipboard {
        inner: MemoryClipboard,
        copy_during_read: Mutex<Option<String>>,
    }

    impl ClipboardSource for LaggingClipboard {
        fn change_count(&self) -> EngineResult<u64> {
            self.inner.change_count()
        }

        fn read_snapshot(&self) -> EngineResult<ClipboardSnapshot> {
            let mut snapshot = self.inner.read_snapshot()?;
            let copied = self
                .copy_during_read
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(text) = copied {
                self.inner.set_text(text);
            }
            snapshot.change_count = self.inner.change_count()?;
            Ok(snapshot)
        }
    }

    fn history_with(repository: Arc<dyn Repository<ClipRecord>>) -> Arc<HistoryStore> {
        let queue = Arc::new(PersistQueue::new(Duration::from_secs(2)).unwrap());
        Arc::new(HistoryStore::open(HistoryConfig::default(), repository, queue).unwrap())
    }

    fn history() -> Arc<HistoryStore> {
        history_with(Arc::new(InMemoryRepository::new()))
    }

    fn scheduler(source: Arc<dyn ClipboardSource>, history: &Arc<HistoryStore>) -> CaptureScheduler {
        CaptureScheduler::new(source, PayloadClassifier::default(), Arc::clone(history), TICK)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn previews(history: &HistoryStore) -> Vec<String> {
        history.list(usize::MAX, 0).iter().map(|r| r.preview()).collect()
    }

    #[tokio::test]
    async fn test_captures_changes_after_start() {
        let clipboard = Arc::new(MemoryClipboard::new());
        clipboard.set_text("before start");
        let history = history();
        let scheduler = scheduler(clipboard.clone(), &history);

        scheduler.start().await;
        assert_eq!(scheduler.state().await, SchedulerState::Running);
        tokio::time::sleep(TICK * 5).await;
        assert!(history.is_empty());

        clipboard.set_text("first");
        wait_until(|| history.len() == 1).await;
        clipboard.set_text("second");
        wait_until(|| history.len() == 2).await;
        assert_eq!(previews(&history), vec!["second", "first"]);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_pause_resume_without_change_adds_nothing() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let history = history();
        let scheduler = scheduler(clipboard.clone(), &history);

        scheduler.start().await;
        assert_eq!(scheduler.pause().await, SchedulerState::Paused);
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(scheduler.resume().await, SchedulerState::Running);
        tokio::time::sleep(TICK * 3).await;

        assert!(history.is_empty());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_changes_while_paused_yield_one_record() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let history = history();
        let scheduler = scheduler(clipboard.clone(), &history);

        scheduler.start().await;
        scheduler.pause().await;
        clipboard.set_text("one");
        clipboard.set_text("two");
        tokio::time::sleep(TICK * 3).await;
        assert!(history.is_empty());

        // The resume poll captures synchronously
        scheduler.resume().await;
        assert_eq!(previews(&history), vec!["two"]);
        scheduler.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pause_waits_for_in_flight_tick() {
        let clipboard = Arc::new(SlowClipboard {
            inner: MemoryClipboard::new(),
            reading: AtomicBool::new(false),
            delay: Duration::from_millis(150),
        });
        let history = history();
        let scheduler = scheduler(clipboard.clone(), &history);
        scheduler.start().await;

        clipboard.inner.set_text("first");
        wait_until(|| clipboard.reading.load(Ordering::SeqCst)).await;

        // Mid-tick: the capture completes before pause is acknowledged
        scheduler.pause().await;
        assert_eq!(previews(&history), vec!["first"]);

        clipboard.inner.set_text("second");
        clipboard.inner.set_text("third");
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(history.len(), 1);

        scheduler.resume().await;
        assert_eq!(previews(&history), vec!["third", "first"]);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_copy_during_snapshot_read_is_captured() {
        let clipboard = Arc::new(LaggingClipboard {
            inner: MemoryClipboard::new(),
            copy_during_read: Mutex::new(Some("newer".to_string())),
        });
        let history = history();
        let scheduler = scheduler(clipboard.clone(), &history);
        scheduler.start().await;

        clipboard.inner.set_text("older");
        wait_until(|| history.len() == 2).await;
        assert_eq!(previews(&history), vec!["newer", "older"]);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_failed_persistence_is_retried() {
        let repository = Arc::new(FlakyRepository::<ClipRecord>::new());
        let history = history_with(repository.clone());
        let clipboard = Arc::new(MemoryClipboard::new());
        let scheduler = scheduler(clipboard.clone(), &history);

        repository.set_failing(true);
        scheduler.start().await;
        clipboard.set_text("kept");
        tokio::time::sleep(TICK * 5).await;
        assert!(history.is_empty());

        repository.set_failing(false);
        wait_until(|| history.len() == 1).await;
        assert_eq!(previews(&history), vec!["kept"]);
        assert_eq!(repository.stored().len(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_newer_capture_supersedes_pending() {
        let repository = Arc::new(FlakyRepository::<ClipRecord>::new());
        let history = history_with(repository.clone());
        let clipboard = Arc::new(MemoryClipboard::new());
        let scheduler = scheduler(clipboard.clone(), &history);

        repository.set_failing(true);
        scheduler.start().await;
        clipboard.set_text("older");
        tokio::time::sleep(TICK * 5).await;
        clipboard.set_text("newer");
        tokio::time::sleep(TICK * 5).await;

        repository.set_failing(false);
        wait_until(|| !history.is_empty()).await;
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(previews(&history), vec!["newer"]);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_rejected_payload_advances_watermark() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let history = history();
        let scheduler = scheduler(clipboard.clone(), &history);

        scheduler.start().await;
        clipboard.set_text("   ");
        tokio::time::sleep(TICK * 5).await;
        assert!(history.is_empty());

        clipboard.set_text("real");
        wait_until(|| history.len() == 1).await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_restartable() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let history = history();
        let scheduler = scheduler(clipboard.clone(), &history);

        scheduler.stop().await;
        scheduler.start().await;
        scheduler.stop().await;
        scheduler.stop().await;
        assert_eq!(scheduler.state().await, SchedulerState::Stopped);
        assert_eq!(scheduler.resume().await, SchedulerState::Stopped);

        clipboard.set_text("while stopped");
        scheduler.start().await;
        tokio::time::sleep(TICK * 3).await;
        assert!(history.is_empty());

        clipboard.set_text("after restart");
        wait_until(|| history.len() == 1).await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_sleep_wake_pauses_and_resumes() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let history = history();
        let scheduler = scheduler(clipboard.clone(), &history);
        scheduler.start().await;

        scheduler.on_will_sleep().await;
        assert_eq!(scheduler.state().await, SchedulerState::Paused);
        clipboard.set_text("copied before sleep");
        scheduler.on_did_wake().await;
        assert_eq!(scheduler.state().await, SchedulerState::Running);
        assert_eq!(history.len(), 1);
        scheduler.stop().await;
    }
}
