//! Error types for the storage crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Empty or path-unsafe context id / session file name.
    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// A session file referenced by name does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Failed to create a directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryError {
        /// The directory path.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("failed to write {path}: {source}")]
    WriteError {
        /// The file path.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to read a file or directory.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// The path being read.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to remove a file or directory.
    #[error("failed to remove {path}: {source}")]
    RemoveError {
        /// The path being removed.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// JSON serialization or parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
