//! Error types for the runtime crate.

use thiserror::Error;

/// Errors that can occur in the agent runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Storage error.
    #[error(transparent)]
    Storage(#[from] courier_storage::StorageError),

    /// An RPC response reported `success: false`.
    #[error("{0}")]
    CommandFailed(String),

    /// The agent process terminated while a request or the completion
    /// wait was outstanding.
    #[error("{0}")]
    ProcessExited(String),

    /// Operation attempted after the RPC client was disposed.
    #[error("RPC client disposed")]
    ClientDisposed,

    /// A streaming text-update callback failed, aborting the prompt.
    #[error("text update callback failed: {0}")]
    TextUpdate(String),

    /// IO error (spawning the process, writing its stdin).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
