//! Supergroup forum-topic context keys.
//!
//! Every forum topic inside a supergroup gets its own isolated context.
//! The context id encodes the chat and topic:
//! `supergroup-{chatId}-topic-{threadId}`, with the literal `general`
//! standing in for the General topic (which has no thread id).

use serde::{Deserialize, Serialize};

use crate::ids::ContextId;

const SUPERGROUP_PREFIX: &str = "supergroup-";
const TOPIC_SEPARATOR: &str = "-topic-";
const GENERAL_TOPIC_ID: &str = "general";

/// Parsed form of a supergroup-topic context id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupergroupTopicKey {
    /// Decimal chat id of the supergroup (may be negative).
    pub chat_id: String,
    /// Thread id of the topic; `None` for the General topic.
    pub message_thread_id: Option<i32>,
}

/// A supergroup topic together with its stored session state.
///
/// Returned by the pool when enumerating every topic of a chat that has
/// a conversation on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicBinding {
    /// Full context id the topic maps to.
    pub context_id: ContextId,
    /// Decimal chat id of the supergroup.
    pub chat_id: String,
    /// Thread id; `None` for the General topic.
    pub message_thread_id: Option<i32>,
    /// Base name of the topic's active session file.
    pub active_session: String,
    /// Number of session files the topic has accumulated.
    pub session_count: usize,
}

/// Builds the context id for a supergroup forum topic.
pub fn supergroup_topic_key(chat_id: i64, message_thread_id: Option<i32>) -> ContextId {
    let topic = match message_thread_id {
        Some(thread_id) => thread_id.to_string(),
        None => GENERAL_TOPIC_ID.to_string(),
    };
    ContextId::from_string(format!(
        "{SUPERGROUP_PREFIX}{chat_id}{TOPIC_SEPARATOR}{topic}"
    ))
}

/// Parses a context id back into its supergroup-topic parts.
///
/// Returns `None` for private-chat ids and for malformed keys (empty chat
/// part, non-positive or non-numeric thread part).
pub fn parse_supergroup_topic_key(context_id: &ContextId) -> Option<SupergroupTopicKey> {
    let raw = context_id.as_str();
    let rest = raw.strip_prefix(SUPERGROUP_PREFIX)?;

    // Chat ids are negative for supergroups, so the separator must be
    // matched from the right.
    let separator_index = rest.rfind(TOPIC_SEPARATOR)?;
    if separator_index == 0 {
        return None;
    }

    let chat_id = &rest[..separator_index];
    let raw_thread_id = &rest[separator_index + TOPIC_SEPARATOR.len()..];

    if raw_thread_id == GENERAL_TOPIC_ID {
        return Some(SupergroupTopicKey {
            chat_id: chat_id.to_string(),
            message_thread_id: None,
        });
    }

    let message_thread_id: i32 = raw_thread_id.parse().ok()?;
    if message_thread_id <= 0 {
        return None;
    }

    Some(SupergroupTopicKey {
        chat_id: chat_id.to_string(),
        message_thread_id: Some(message_thread_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip_with_thread() {
        let key = supergroup_topic_key(-100123, Some(42));
        assert_eq!(key.as_str(), "supergroup--100123-topic-42");

        let parsed = parse_supergroup_topic_key(&key).unwrap();
        assert_eq!(parsed.chat_id, "-100123");
        assert_eq!(parsed.message_thread_id, Some(42));
    }

    #[test]
    fn test_key_round_trip_general() {
        let key = supergroup_topic_key(-100123, None);
        assert_eq!(key.as_str(), "supergroup--100123-topic-general");

        let parsed = parse_supergroup_topic_key(&key).unwrap();
        assert_eq!(parsed.chat_id, "-100123");
        assert_eq!(parsed.message_thread_id, None);
    }

    #[test]
    fn test_private_chat_id_does_not_parse() {
        assert!(parse_supergroup_topic_key(&ContextId::from_string("1001")).is_none());
    }

    #[test]
    fn test_malformed_keys_rejected() {
        for raw in [
            "supergroup--topic-",
            "supergroup--100123-topic-abc",
            "supergroup--100123-topic-0",
            "supergroup--100123-topic--5",
            "supergroup--100123",
        ] {
            assert!(
                parse_supergroup_topic_key(&ContextId::from_string(raw)).is_none(),
                "expected {raw} to be rejected"
            );
        }
    }

    #[test]
    fn test_chat_ids_containing_separator_like_text() {
        // rfind keeps a chat part that itself ends in "-topic-<n>" intact
        let key = ContextId::from_string("supergroup--100-topic-7-topic-9");
        let parsed = parse_supergroup_topic_key(&key).unwrap();
        assert_eq!(parsed.chat_id, "-100-topic-7");
        assert_eq!(parsed.message_thread_id, Some(9));
    }
}
