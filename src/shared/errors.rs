//! Engine error taxonomy
//!
//! Every public operation returns `EngineResult<T>`. The variants mirror what callers can
//! act on: unknown keys, skipped clipboard payloads, storage failures and bad settings.
//! All errors are serializable so the UI layer can forward them over IPC unchanged.

use serde::Serialize;
use thiserror::Error;

use crate::shared::types::RecordKey;
use crate::storage::StorageError;

/// Engine operation errors
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum EngineError {
    /// Unknown key on get/remove/pin
    #[error("Record not found: {0}")]
    NotFound(RecordKey),

    /// Clipboard content that will not be recorded
    #[error("Payload rejected: {0}")]
    RejectedPayload(RejectReason),

    /// Storage I/O error or write timeout; the operation was aborted
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Invalid settings; the engine must not start
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Clipboard could not be read
    #[error("Clipboard error: {0}")]
    Clipboard(String),
}

/// Why the classifier refused a clipboard snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("clipboard holds no supported representation")]
    Unsupported,

    #[error("clipboard content is empty")]
    Empty,

    #[error("payload is {size} bytes, limit is {limit}")]
    Oversized { size: usize, limit: usize },

    #[error("source application {app} is excluded")]
    ExcludedApplication { app: String },

    #[error("content matches a secret pattern")]
    Sensitive,
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        EngineError::PersistenceFailure(err.to_string())
    }
}

impl From<RejectReason> for EngineError {
    fn from(reason: RejectReason) -> Self {
        EngineError::RejectedPayload(reason)
    }
}

// Helper type alias for engine results
pub type EngineResult<T> = Result<T, EngineError>;
