//! Tool-call summaries surfaced by the agent runtime.

use serde::{Deserialize, Serialize};

/// Summary of one tool invocation made by the agent during a prompt.
///
/// Stored alongside the final answer so the bot can show what the agent
/// actually did (`/details`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSummary {
    /// Unique id of the tool call within the conversation.
    pub tool_call_id: String,

    /// Name of the invoked tool.
    pub tool_name: String,

    /// Tool arguments, if they were a JSON object.
    #[serde(default)]
    pub args: Option<serde_json::Map<String, serde_json::Value>>,
}
