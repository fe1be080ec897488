use std::sync::Arc;

use clipkeep_lib::SystemClipboard;

#[tokio::main]
async fn main() {
    clipkeep_lib::init_logging();
    tracing::info!("Starting clipkeep");

    if let Err(e) = clipkeep_lib::run(Arc::new(SystemClipboard::new())).await {
        tracing::error!("clipkeep stopped: {}", e);
        std::process::exit(1);
    }
}
