//! Identifier types for Courier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a logical conversation context.
///
/// A context is either a private chat (the decimal chat id) or a
/// supergroup forum topic (see [`crate::topic`]). Contexts are never
/// pre-declared; they spring into existence on first use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Creates a context id from a string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a context id for a private chat.
    pub fn for_private_chat(chat_id: i64) -> Self {
        Self(chat_id.to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContextId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ContextId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_string_and_display() {
        let id = ContextId::from_string("chat-1");
        assert_eq!(id.as_str(), "chat-1");
        assert_eq!(id.to_string(), "chat-1");
    }

    #[test]
    fn test_for_private_chat() {
        assert_eq!(ContextId::for_private_chat(1001).as_str(), "1001");
        assert_eq!(ContextId::for_private_chat(-100123).as_str(), "-100123");
    }
}
