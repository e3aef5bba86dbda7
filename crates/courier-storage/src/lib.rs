//! Durable per-context storage for Courier.
//!
//! This crate owns everything the bridge keeps on disk:
//! - `SessionStore` - maps a conversation context to its session files
//!   (`session-*.jsonl`) and the `active-session.txt` pointer that names
//!   the one currently in use. The store only creates, points to, or
//!   deletes session files; the agent process owns their contents.
//! - `DetailsStore` - one `latest-response.json` record per context with
//!   the last prompt, full answer text, and tool-call summaries.
//!
//! Pointer and record writes go through the atomic write helper (temp
//! file, then rename) so a crash never leaves a half-written file.

pub mod atomic;
pub mod details_store;
pub mod error;
pub mod session_store;

pub use details_store::{DetailsStore, PromptDetailsRecord};
pub use error::{Result, StorageError};
pub use session_store::{
    SessionDeletion, SessionRotation, SessionState, SessionStore, SessionSwitch,
};
