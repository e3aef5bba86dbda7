//! Error types for the Telegram bridge.

use thiserror::Error;

/// Errors that can occur in the Telegram bridge.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Telegram API request failed.
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),

    /// Agent runtime error.
    #[error(transparent)]
    Runtime(#[from] courier_runtime::RuntimeError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] courier_storage::StorageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Telegram bridge operations.
pub type Result<T> = std::result::Result<T, TelegramError>;
