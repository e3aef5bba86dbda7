//! Latest-response details per conversation context.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use courier_models::{ContextId, ToolCallSummary};

use crate::atomic::atomic_write_json;
use crate::error::{Result, StorageError};
use crate::session_store::validate_identifier;

const DETAILS_FILE_NAME: &str = "latest-response.json";

/// Record of the most recent prompt handled for a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDetailsRecord {
    /// When the record was written.
    pub updated_at: DateTime<Utc>,
    /// The user's prompt text.
    pub prompt: String,
    /// The agent's full answer text.
    pub full_text: String,
    /// Tool invocations made while producing the answer.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallSummary>,
}

/// Stores one `latest-response.json` per context, next to its session
/// files. Reads are tolerant: a missing or unparsable record is `None`.
pub struct DetailsStore {
    sessions_dir: PathBuf,
}

impl DetailsStore {
    /// Creates a store rooted at the same directory as the session store.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    /// Persists the latest record for a context, replacing any previous one.
    pub async fn save_latest(
        &self,
        context_id: &ContextId,
        record: &PromptDetailsRecord,
    ) -> Result<()> {
        let path = self.details_path(context_id)?;
        atomic_write_json(&path, record).await
    }

    /// Returns the latest record for a context, if a readable one exists.
    pub async fn get_latest(&self, context_id: &ContextId) -> Result<Option<PromptDetailsRecord>> {
        let path = self.details_path(context_id)?;

        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(_) => return Ok(None),
        };

        Ok(serde_json::from_str(&raw).ok())
    }

    /// Removes the record for a context, if present.
    pub async fn clear(&self, context_id: &ContextId) -> Result<()> {
        let path = self.details_path(context_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::RemoveError { path, source }),
        }
    }

    fn details_path(&self, context_id: &ContextId) -> Result<PathBuf> {
        let id = validate_identifier(context_id.as_str())?;
        Ok(self.sessions_dir.join(id).join(DETAILS_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(prompt: &str, text: &str) -> PromptDetailsRecord {
        PromptDetailsRecord {
            updated_at: Utc::now(),
            prompt: prompt.to_string(),
            full_text: text.to_string(),
            tool_calls: vec![ToolCallSummary {
                tool_call_id: "tool-1".to_string(),
                tool_name: "bash".to_string(),
                args: json!({"command": "ls"}).as_object().cloned(),
            }],
        }
    }

    #[tokio::test]
    async fn test_save_and_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = DetailsStore::new(dir.path());
        let id = ContextId::from_string("chat-1");

        store
            .save_latest(&id, &record("analyze this", "the answer"))
            .await
            .unwrap();

        let loaded = store.get_latest(&id).await.unwrap().unwrap();
        assert_eq!(loaded.prompt, "analyze this");
        assert_eq!(loaded.full_text, "the answer");
        assert_eq!(loaded.tool_calls.len(), 1);
        assert_eq!(loaded.tool_calls[0].tool_name, "bash");
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = DetailsStore::new(dir.path());

        let loaded = store
            .get_latest(&ContextId::from_string("chat-1"))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_get_corrupt_record_returns_none() {
        let dir = tempdir().unwrap();
        let store = DetailsStore::new(dir.path());
        let id = ContextId::from_string("chat-1");

        let path = dir.path().join("chat-1").join(DETAILS_FILE_NAME);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, "{ not json").await.unwrap();

        assert!(store.get_latest(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = DetailsStore::new(dir.path());
        let id = ContextId::from_string("chat-1");

        store.save_latest(&id, &record("p", "t")).await.unwrap();
        store.clear(&id).await.unwrap();
        store.clear(&id).await.unwrap();

        assert!(store.get_latest(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_context_id() {
        let dir = tempdir().unwrap();
        let store = DetailsStore::new(dir.path());

        let result = store.get_latest(&ContextId::from_string("../up")).await;
        assert!(matches!(result, Err(StorageError::InvalidIdentifier(_))));
    }
}
