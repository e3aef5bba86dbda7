//! Core data models for Courier.
//!
//! This crate provides the fundamental data types shared across the
//! Courier system: conversation context identifiers, the supergroup
//! forum-topic context key grammar, and tool-call summaries.

pub mod ids;
pub mod tool;
pub mod topic;

// Re-export main types
pub use ids::ContextId;
pub use tool::ToolCallSummary;
pub use topic::{
    parse_supergroup_topic_key, supergroup_topic_key, SupergroupTopicKey, TopicBinding,
};
