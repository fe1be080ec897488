pub mod types;
pub mod settings;
pub mod errors;

// Re-export EngineError for convenience
pub use errors::{EngineError, EngineResult, RejectReason};
