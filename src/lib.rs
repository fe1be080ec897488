//! clipkeep: clipboard capture and history engine
//!
//! Polls a clipboard source, classifies and deduplicates what it finds, and keeps a
//! capacity-bounded, pinnable history alongside user-authored snippets. Global hotkeys and
//! the UI layer reach the stores through `api::ActionGateway`.

pub mod api;
pub mod core;
pub mod shared;
pub mod storage;

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub use crate::core::clipboard::{ClipboardSource, MemoryClipboard, SleepWakeObserver};
pub use crate::core::engine::Engine;
pub use crate::core::hotkeys::{ActionOutcome, HotKeyAction, KeyCombo, KeyEvent};
pub use shared::errors::{EngineError, EngineResult, RejectReason};
pub use shared::settings::EngineSettings;

#[cfg(feature = "system-clipboard")]
pub use crate::core::clipboard::SystemClipboard;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("clipkeep=info,clipkeep_lib=info")),
        )
        .init();
}

/// Run the engine headless until Ctrl-C.
pub async fn run(source: Arc<dyn ClipboardSource>) -> EngineResult<()> {
    let settings = EngineSettings::load().await?;
    let engine = Engine::open(settings, source)?;
    engine.start().await?;
    info!(
        "[clipkeep] Capturing clipboard ({} records in history)",
        engine.history().len()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("[clipkeep] Failed to listen for shutdown signal: {}", e);
    }

    engine.shutdown().await;
    Ok(())
}
