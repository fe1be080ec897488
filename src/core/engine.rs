use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::ActionGateway;
use crate::core::clipboard::{
    CaptureScheduler, ClassifierConfig, ClipboardSource, HistoryConfig, HistoryStore,
    PayloadClassifier, SleepWakeObserver,
};
use crate::core::hotkeys::{ActionOutcome, HotKeyDispatcher, KeyEvent};
use crate::core::snippets::SnippetStore;
use crate::shared::errors::{EngineError, EngineResult};
use crate::shared::settings::EngineSettings;
use crate::shared::types::{ClipRecord, SnippetFolder, SnippetRecord};
use crate::storage::{
    InMemoryRepository, Migrate, MigrationReport, PersistQueue, RedbDatabase, Repository,
};

/// Database file inside the data directory
pub const DATABASE_FILE: &str = "clipkeep.redb";

/// Process-wide owner of the stores, the capture loop and the hotkey dispatcher.
///
/// Build one with `Engine::open` (redb on disk) or `Engine::in_memory`, call `start`, and
/// `shutdown` before exit so queued writes reach the disk.
pub struct Engine {
    settings: EngineSettings,
    history: Arc<HistoryStore>,
    snippets: Arc<SnippetStore>,
    scheduler: Arc<CaptureScheduler>,
    gateway: Arc<ActionGateway>,
    dispatcher: Arc<HotKeyDispatcher>,
    queue: Arc<PersistQueue>,
    migration: Option<MigrationReport>,
}

impl Engine {
    /// Open (and migrate) the database in the configured data directory.
    pub fn open(settings: EngineSettings, source: Arc<dyn ClipboardSource>) -> EngineResult<Self> {
        settings.validate()?;
        let path = settings.data_dir()?.join(DATABASE_FILE);
        info!("[Engine] Opening database at {}", path.display());

        let database = RedbDatabase::open(&path)?;
        let report = database.migrate()?;

        let mut engine = Self::assemble(
            settings,
            source,
            Arc::new(database.repository::<ClipRecord>()),
            Arc::new(database.repository::<SnippetRecord>()),
            Arc::new(database.repository::<SnippetFolder>()),
        )?;
        engine.migration = Some(report);
        Ok(engine)
    }

    /// Engine whose records live only as long as the process.
    pub fn in_memory(settings: EngineSettings, source: Arc<dyn ClipboardSource>) -> EngineResult<Self> {
        settings.validate()?;
        Self::assemble(
            settings,
            source,
            Arc::new(InMemoryRepository::new()),
            Arc::new(InMemoryRepository::new()),
            Arc::new(InMemoryRepository::new()),
        )
    }

    fn assemble(
        settings: EngineSettings,
        source: Arc<dyn ClipboardSource>,
        history_repository: Arc<dyn Repository<ClipRecord>>,
        snippet_repository: Arc<dyn Repository<SnippetRecord>>,
        folder_repository: Arc<dyn Repository<SnippetFolder>>,
    ) -> EngineResult<Self> {
        let queue = Arc::new(PersistQueue::new(settings.write_timeout())?);

        let history = Arc::new(HistoryStore::open(
            HistoryConfig::from(&settings.history),
            history_repository,
            Arc::clone(&queue),
        )?);
        let snippets = Arc::new(SnippetStore::open(
            snippet_repository,
            folder_repository,
            Arc::clone(&queue),
        )?);

        let gateway = Arc::new(ActionGateway::new(
            Arc::clone(&history),
            Arc::clone(&snippets),
            settings.history.keep_pinned_on_clear,
        ));
        let dispatcher = Arc::new(HotKeyDispatcher::from_settings(
            Arc::clone(&gateway),
            &settings.hotkeys,
        )?);
        let scheduler = Arc::new(CaptureScheduler::new(
            source,
            PayloadClassifier::new(ClassifierConfig::from(&settings.capture)),
            Arc::clone(&history),
            settings.poll_interval(),
        ));

        Ok(Self {
            settings,
            history,
            snippets,
            scheduler,
            gateway,
            dispatcher,
            queue,
            migration: None,
        })
    }

    /// Purge expired records and begin capturing. Capture does not start if the purge
    /// cannot be persisted.
    pub async fn start(&self) -> EngineResult<()> {
        let history = Arc::clone(&self.history);
        let purged = tokio::task::spawn_blocking(move || history.purge_expired(Utc::now()))
            .await
            .map_err(|e| EngineError::PersistenceFailure(format!("Startup purge task failed: {}", e)))?;
        if let Err(e) = purged {
            warn!("[Engine] Startup purge failed: {}", e);
            return Err(e);
        }
        self.scheduler.start().await;
        info!("[Engine] Started");
        Ok(())
    }

    /// Stop capturing and flush pending writes. The engine cannot be restarted afterwards.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        let queue = Arc::clone(&self.queue);
        if let Err(e) = tokio::task::spawn_blocking(move || queue.shutdown()).await {
            warn!("[Engine] Persistence writer did not shut down cleanly: {}", e);
        }
        info!("[Engine] Shut down");
    }

    pub fn handle_key(&self, event: KeyEvent) -> EngineResult<Option<ActionOutcome>> {
        self.dispatcher.handle(event)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn snippets(&self) -> &Arc<SnippetStore> {
        &self.snippets
    }

    pub fn scheduler(&self) -> &Arc<CaptureScheduler> {
        &self.scheduler
    }

    pub fn gateway(&self) -> &Arc<ActionGateway> {
        &self.gateway
    }

    pub fn dispatcher(&self) -> &Arc<HotKeyDispatcher> {
        &self.dispatcher
    }

    /// Outcome of the startup migration; `None` for in-memory engines
    pub fn migration(&self) -> Option<MigrationReport> {
        self.migration
    }
}

#[async_trait]
impl SleepWakeObserver for Engine {
    async fn on_will_sleep(&self) {
        info!("[Engine] System going to sleep");
        self.scheduler.on_will_sleep().await;
    }

    async fn on_did_wake(&self) {
        info!("[Engine] System woke up");
        self.scheduler.on_did_wake().await;
    }
}
