//! Atomic file operations for crash-safe persistence.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, StorageError};

/// Writes data to a file atomically.
///
/// Writes to a temporary sibling first, then renames it onto the target
/// path, so the file is never observable in a partially written state.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub async fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| StorageError::DirectoryError {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    // Temp file in the same directory, so the rename stays on one filesystem.
    let temp_path = temp_sibling(path);

    let write = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok::<(), std::io::Error>(())
    };

    if let Err(source) = write.await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::WriteError {
            path: path.to_path_buf(),
            source,
        });
    }

    fs::rename(&temp_path, path)
        .await
        .map_err(|source| StorageError::WriteError {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes JSON data to a file atomically.
pub async fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    atomic_write(path, json.as_bytes()).await
}

/// Reads and deserializes JSON from a file.
pub async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path)
        .await
        .map_err(|source| StorageError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[tokio::test]
    async fn test_atomic_write_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");

        atomic_write(&path, b"hello world").await.unwrap();

        assert_eq!(fs::read_to_string(&path).await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_atomic_write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/test.txt");

        atomic_write(&path, b"nested content").await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pointer.txt");

        atomic_write(&path, b"one").await.unwrap();
        atomic_write(&path, b"two").await.unwrap();

        let mut names = Vec::new();
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["pointer.txt".to_string()]);
        assert_eq!(fs::read_to_string(&path).await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_atomic_write_json_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        atomic_write_json(&path, &data).await.unwrap();
        let loaded: TestData = read_json(&path).await.unwrap();

        assert_eq!(data, loaded);
    }
}
