use crate::common::model::{SessionKey, TransferStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the session engine.
///
/// Transport-reported failures stay scoped to their own session; local
/// housekeeping failures are logged and recovered where they happen.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Event for a key with no open record that is not allowed to open one.
    #[error("unknown session {0}")]
    UnknownSession(SessionKey),

    #[error("failed to relocate {path}: {source}")]
    RelocationFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport reported an error for session {key}: {message}")]
    TransportError { key: SessionKey, message: String },

    /// Error or cancellation arrived after the opposing terminal state.
    #[error("session {key} already settled as {kept}")]
    CancelRace { key: SessionKey, kept: TransferStatus },

    #[error("session {0} is not in a terminal state")]
    NotTerminal(SessionKey),

    #[error("session {0} still has side effects running")]
    SideEffectsPending(SessionKey),

    #[error("the engine must be created inside a Tokio runtime")]
    NoRuntime,
}

impl EngineError {
    pub fn relocation(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::RelocationFailure {
            path: path.into(),
            source,
        }
    }
}
