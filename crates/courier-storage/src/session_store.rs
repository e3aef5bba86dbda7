//! Session file management per conversation context.
//!
//! Each context owns a directory under the sessions root:
//!
//! ```text
//! <sessions_dir>/<context_id>/
//!   active-session.txt        # base name of the active session file
//!   session-<timestamp>-<6 hex>.jsonl
//!   ...
//! ```
//!
//! Exactly one session file per context is active at any time. The store
//! never mutates session file contents; the agent process appends to them.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use courier_models::ContextId;

use crate::atomic::atomic_write;
use crate::error::{Result, StorageError};

const ACTIVE_POINTER_FILE: &str = "active-session.txt";
const SESSION_FILE_PREFIX: &str = "session-";
const SESSION_FILE_SUFFIX: &str = ".jsonl";

/// Result of rotating a context to a fresh session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRotation {
    /// Path of the previously active session file (still on disk).
    pub previous_path: PathBuf,
    /// Path of the newly created, now-active session file.
    pub next_path: PathBuf,
}

/// Snapshot of a context's session files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Full path of the active session file.
    pub active_path: PathBuf,
    /// Base name of the active session file.
    pub active_file_name: String,
    /// All session file names, newest first.
    pub session_file_names: Vec<String>,
}

/// Result of switching the active session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSwitch {
    /// Path of the session file that was active before the switch.
    pub previous_path: PathBuf,
    /// Path of the session file that is active after the switch.
    pub next_path: PathBuf,
}

/// Result of deleting a session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDeletion {
    /// Path of the removed session file.
    pub deleted_path: PathBuf,
    /// Whether the removed file was the active one.
    pub was_active: bool,
    /// Path that was active before the deletion.
    pub previous_active_path: PathBuf,
    /// Path that is active after the deletion.
    pub next_active_path: PathBuf,
    /// Session file names left in the context, newest first.
    pub remaining_session_file_names: Vec<String>,
}

/// Durable mapping from context id to active/available session files.
///
/// Independent of process lifecycle: disposing an agent runtime never
/// touches this store, and deleting session data is always an explicit,
/// user-initiated operation.
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    /// Creates a store rooted at the given sessions directory.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    /// Returns the sessions root directory.
    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Returns the active session file path for a context.
    ///
    /// If the pointer file is missing or empty, a new empty session file
    /// is created and pointed to. Repeated calls without an intervening
    /// rotate/switch return the same path.
    pub async fn active_session_path(&self, context_id: &ContextId) -> Result<PathBuf> {
        let context_dir = self.ensure_context_dir(context_id).await?;
        let pointer_path = context_dir.join(ACTIVE_POINTER_FILE);

        if let Ok(contents) = fs::read_to_string(&pointer_path).await {
            let file_name = contents.trim();
            if !file_name.is_empty() {
                return Ok(context_dir.join(file_name));
            }
        }

        let next_path = self.create_session_file(&context_dir).await?;
        self.write_pointer(&pointer_path, &next_path).await?;
        Ok(next_path)
    }

    /// Returns a snapshot of the context's session files, newest first.
    ///
    /// The active file is always included, even if it was somehow missing
    /// from the directory scan.
    pub async fn session_state(&self, context_id: &ContextId) -> Result<SessionState> {
        let active_path = self.active_session_path(context_id).await?;
        let active_file_name = base_name(&active_path);
        let context_dir = self.context_dir(context_id)?;

        let mut session_file_names = self.scan_session_files(&context_dir).await?;
        if !session_file_names.contains(&active_file_name) {
            session_file_names.push(active_file_name.clone());
        }
        session_file_names.sort_by(|a, b| b.cmp(a));

        Ok(SessionState {
            active_path,
            active_file_name,
            session_file_names,
        })
    }

    /// Creates a brand-new session file and repoints active to it.
    ///
    /// The previous file is preserved; rotation is the "conversation
    /// reset" primitive and never deletes history.
    pub async fn rotate_session(&self, context_id: &ContextId) -> Result<SessionRotation> {
        let context_dir = self.ensure_context_dir(context_id).await?;
        let pointer_path = context_dir.join(ACTIVE_POINTER_FILE);
        let previous_path = self.active_session_path(context_id).await?;
        let next_path = self.create_session_file(&context_dir).await?;
        self.write_pointer(&pointer_path, &next_path).await?;

        debug!(
            context_id = %context_id,
            next = %base_name(&next_path),
            "session rotated"
        );

        Ok(SessionRotation {
            previous_path,
            next_path,
        })
    }

    /// Repoints active to an existing session file.
    ///
    /// Switching to the file that is already active is a no-op but still
    /// reports the (identical) previous and next paths.
    pub async fn switch_session(
        &self,
        context_id: &ContextId,
        file_name: &str,
    ) -> Result<SessionSwitch> {
        let file_name = validate_session_file_name(file_name)?;
        let context_dir = self.ensure_context_dir(context_id).await?;
        let previous_path = self.active_session_path(context_id).await?;

        let next_path = context_dir.join(&file_name);
        if !fs::try_exists(&next_path).await.unwrap_or(false) {
            return Err(StorageError::SessionNotFound(file_name));
        }

        if next_path != previous_path {
            let pointer_path = context_dir.join(ACTIVE_POINTER_FILE);
            self.write_pointer(&pointer_path, &next_path).await?;
        }

        Ok(SessionSwitch {
            previous_path,
            next_path,
        })
    }

    /// Deletes a session file.
    ///
    /// Deleting the active file never leaves the context without an
    /// active session: if other files remain, the newest one becomes
    /// active; if it was the last file, a fresh one is created.
    pub async fn delete_session(
        &self,
        context_id: &ContextId,
        file_name: &str,
    ) -> Result<SessionDeletion> {
        let file_name = validate_session_file_name(file_name)?;
        let context_dir = self.ensure_context_dir(context_id).await?;
        let previous_active_path = self.active_session_path(context_id).await?;

        let deleted_path = context_dir.join(&file_name);
        if !fs::try_exists(&deleted_path).await.unwrap_or(false) {
            return Err(StorageError::SessionNotFound(file_name));
        }

        let was_active = deleted_path == previous_active_path;
        fs::remove_file(&deleted_path)
            .await
            .map_err(|source| StorageError::RemoveError {
                path: deleted_path.clone(),
                source,
            })?;

        let mut remaining = self.scan_session_files(&context_dir).await?;
        remaining.sort_by(|a, b| b.cmp(a));

        let pointer_path = context_dir.join(ACTIVE_POINTER_FILE);
        let next_active_path = if !was_active {
            previous_active_path.clone()
        } else if let Some(newest) = remaining.first() {
            let next = context_dir.join(newest);
            self.write_pointer(&pointer_path, &next).await?;
            next
        } else {
            let next = self.create_session_file(&context_dir).await?;
            self.write_pointer(&pointer_path, &next).await?;
            remaining.push(base_name(&next));
            next
        };

        debug!(
            context_id = %context_id,
            deleted = %file_name,
            was_active,
            remaining = remaining.len(),
            "session deleted"
        );

        Ok(SessionDeletion {
            deleted_path,
            was_active,
            previous_active_path,
            next_active_path,
            remaining_session_file_names: remaining,
        })
    }

    /// Recursively removes a context's entire directory.
    pub async fn delete_context(&self, context_id: &ContextId) -> Result<()> {
        let context_dir = self.context_dir(context_id)?;
        if fs::try_exists(&context_dir).await.unwrap_or(false) {
            fs::remove_dir_all(&context_dir)
                .await
                .map_err(|source| StorageError::RemoveError {
                    path: context_dir,
                    source,
                })?;
        }
        Ok(())
    }

    /// Enumerates all context directories, sorted lexicographically.
    pub async fn list_context_ids(&self) -> Result<Vec<ContextId>> {
        if !fs::try_exists(&self.sessions_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries =
            fs::read_dir(&self.sessions_dir)
                .await
                .map_err(|source| StorageError::ReadError {
                    path: self.sessions_dir.clone(),
                    source,
                })?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StorageError::ReadError {
                path: self.sessions_dir.clone(),
                source,
            })?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                ids.push(ContextId::from_string(
                    entry.file_name().to_string_lossy().into_owned(),
                ));
            }
        }

        ids.sort();
        Ok(ids)
    }

    fn context_dir(&self, context_id: &ContextId) -> Result<PathBuf> {
        let id = validate_identifier(context_id.as_str())?;
        Ok(self.sessions_dir.join(id))
    }

    async fn ensure_context_dir(&self, context_id: &ContextId) -> Result<PathBuf> {
        let context_dir = self.context_dir(context_id)?;
        fs::create_dir_all(&context_dir)
            .await
            .map_err(|source| StorageError::DirectoryError {
                path: context_dir.clone(),
                source,
            })?;
        Ok(context_dir)
    }

    async fn create_session_file(&self, context_dir: &Path) -> Result<PathBuf> {
        let timestamp = Utc::now()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace(':', "-");
        let suffix = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "{SESSION_FILE_PREFIX}{timestamp}-{}{SESSION_FILE_SUFFIX}",
            &suffix[..6]
        );

        let session_path = context_dir.join(file_name);
        fs::File::create(&session_path)
            .await
            .map_err(|source| StorageError::WriteError {
                path: session_path.clone(),
                source,
            })?;
        Ok(session_path)
    }

    async fn write_pointer(&self, pointer_path: &Path, session_path: &Path) -> Result<()> {
        let contents = format!("{}\n", base_name(session_path));
        atomic_write(pointer_path, contents.as_bytes()).await
    }

    async fn scan_session_files(&self, context_dir: &Path) -> Result<Vec<String>> {
        let mut entries =
            fs::read_dir(context_dir)
                .await
                .map_err(|source| StorageError::ReadError {
                    path: context_dir.to_path_buf(),
                    source,
                })?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StorageError::ReadError {
                path: context_dir.to_path_buf(),
                source,
            })?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_session_file_name(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

/// True if a file name looks like a session file.
pub fn is_session_file_name(name: &str) -> bool {
    name.starts_with(SESSION_FILE_PREFIX) && name.ends_with(SESSION_FILE_SUFFIX)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn validate_identifier(id: &str) -> Result<&str> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidIdentifier(id.to_string()));
    }

    // The id must equal its own basename: no separators, no traversal.
    let is_basename = Path::new(trimmed)
        .file_name()
        .map(|name| name == trimmed)
        .unwrap_or(false);
    if !is_basename {
        return Err(StorageError::InvalidIdentifier(id.to_string()));
    }

    Ok(trimmed)
}

fn validate_session_file_name(file_name: &str) -> Result<String> {
    let name = validate_identifier(file_name)?;
    if !is_session_file_name(name) {
        return Err(StorageError::InvalidIdentifier(file_name.to_string()));
    }
    Ok(name.to_string())
}
