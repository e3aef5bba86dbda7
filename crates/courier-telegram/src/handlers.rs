//! Message and command handlers.
//!
//! Every inbound update resolves to a conversation route first: private
//! chats map to their chat id, supergroup messages map to a per-topic
//! context. Messages from users outside the allowlist are ignored
//! silently, with no reply.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ThreadId};
use teloxide::utils::command::BotCommands;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use courier_models::{supergroup_topic_key, ContextId, ToolCallSummary, TopicBinding};
use courier_runtime::{AgentPool, PromptOptions, SessionOverview};
use courier_storage::{DetailsStore, PromptDetailsRecord};

use crate::config::BotConfig;
use crate::error::Result;
use crate::outbound::Outbound;
use crate::stream::StreamRenderer;

/// Typing indicator refresh cadence while a prompt is in flight.
const TYPING_REFRESH: Duration = Duration::from_secs(4);

/// Bot commands that can be invoked with /.
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "show the welcome message")]
    Start,

    #[command(description = "show available commands")]
    Help,

    #[command(description = "start a fresh conversation (history is kept on disk)")]
    Reset,

    #[command(description = "manage sessions: /session list | new | use <n> | delete <n>")]
    Session(String),

    #[command(description = "show the full text and tool calls of the last answer")]
    Details,
}

/// Shared state across handlers.
pub struct AppState {
    /// Bridge configuration.
    pub config: BotConfig,
    /// The agent pool.
    pub pool: AgentPool,
    /// Latest-answer records.
    pub details: DetailsStore,
    /// Outbound Telegram helper.
    pub outbound: Outbound,
}

impl AppState {
    fn is_allowed(&self, msg: &Message) -> bool {
        msg.from
            .as_ref()
            .map(|user| self.config.allowed_user_ids.contains(&user.id.0))
            .unwrap_or(false)
    }
}

/// Where a message's conversation lives.
#[derive(Debug, Clone)]
pub struct Route {
    /// Context id of the conversation.
    pub context_id: ContextId,
    /// Chat to reply into.
    pub chat_id: ChatId,
    /// Forum topic to reply into, if any.
    pub thread_id: Option<ThreadId>,
    /// Whether this is a supergroup (topic semantics apply).
    pub is_supergroup: bool,
}

/// Resolves the conversation route for a message. Chats that are neither
/// private nor supergroups have no route and are ignored.
pub fn route_for_message(msg: &Message) -> Option<Route> {
    if msg.chat.is_private() {
        return Some(Route {
            context_id: ContextId::for_private_chat(msg.chat.id.0),
            chat_id: msg.chat.id,
            thread_id: None,
            is_supergroup: false,
        });
    }

    if msg.chat.is_supergroup() {
        let thread_id = msg.thread_id;
        return Some(Route {
            context_id: supergroup_topic_key(msg.chat.id.0, thread_id.map(|t| t.0 .0)),
            chat_id: msg.chat.id,
            thread_id,
            is_supergroup: true,
        });
    }

    None
}

/// Handles a parsed command.
pub async fn handle_command(
    _bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(route) = route_for_message(&msg) else {
        return Ok(());
    };
    if !state.is_allowed(&msg) {
        debug!(chat_id = msg.chat.id.0, "ignoring command from unlisted user");
        return Ok(());
    }

    info!(context_id = %route.context_id, command = ?cmd, "command received");

    let outcome = match cmd {
        Command::Start => send(&state, &route, &welcome_text()).await,
        Command::Help => send(&state, &route, &Command::descriptions().to_string()).await,
        Command::Reset => handle_reset(&state, &route).await,
        Command::Session(args) => handle_session(&state, &route, &args).await,
        Command::Details => handle_details(&state, &route).await,
    };

    if let Err(err) = outcome {
        error!(context_id = %route.context_id, error = %err, "command failed");
        let _ = send(&state, &route, &format!("Request failed: {err}")).await;
    }
    Ok(())
}

/// Handles a plain (non-command) text message by running a prompt.
pub async fn handle_message(
    _bot: Bot,
    msg: Message,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(route) = route_for_message(&msg) else {
        return Ok(());
    };
    if !state.is_allowed(&msg) {
        debug!(chat_id = msg.chat.id.0, "ignoring message from unlisted user");
        return Ok(());
    }
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }

    info!(
        context_id = %route.context_id,
        user_id = msg.from.as_ref().map(|u| u.id.0).unwrap_or_default(),
        preview = %text.chars().take(80).collect::<String>(),
        "incoming message"
    );

    let typing = spawn_typing_loop(state.outbound.clone(), route.chat_id, route.thread_id);
    let renderer = StreamRenderer::spawn(
        state.outbound.clone(),
        route.chat_id,
        route.thread_id,
        state.config.stream_edit_throttle,
    );
    let options = PromptOptions {
        on_text_update: Some(renderer.update_fn()),
    };

    let prompt_result = state.pool.run_prompt(&route.context_id, text, options).await;
    typing.abort();

    match prompt_result {
        Ok(result) => {
            let record = PromptDetailsRecord {
                updated_at: Utc::now(),
                prompt: text.to_string(),
                full_text: result.text.clone(),
                tool_calls: result.tool_calls.clone(),
            };
            if let Err(err) = state.details.save_latest(&route.context_id, &record).await {
                warn!(context_id = %route.context_id, error = %err, "failed to save details");
            }

            let message_id: Option<MessageId> = renderer.finish(&result.text).await;
            info!(
                context_id = %route.context_id,
                response_length = result.text.len(),
                rendered = message_id.is_some(),
                "message handled"
            );
        }
        Err(err) => {
            error!(context_id = %route.context_id, error = %err, "prompt failed");
            let _ = renderer.finish(&format!("Request failed: {err}")).await;
        }
    }
    Ok(())
}

async fn handle_reset(state: &AppState, route: &Route) -> Result<()> {
    state.pool.reset(&route.context_id).await?;
    state.details.clear(&route.context_id).await?;
    send(
        state,
        route,
        "Conversation reset. The next message starts a fresh session; history stays on disk.",
    )
    .await
}

async fn handle_details(state: &AppState, route: &Route) -> Result<()> {
    let text = match state.details.get_latest(&route.context_id).await? {
        Some(record) => format_details(&record),
        None => "No answer details stored for this conversation yet.".to_string(),
    };
    send(state, route, &text).await
}

async fn handle_session(state: &AppState, route: &Route, args: &str) -> Result<()> {
    let action = match parse_session_action(args) {
        Ok(action) => action,
        Err(usage) => return send(state, route, &usage).await,
    };

    match action {
        SessionAction::List if route.is_supergroup => {
            let bindings = state
                .pool
                .list_supergroup_topic_bindings(&route.chat_id.0.to_string())
                .await?;
            let current_thread = route.thread_id.map(|t| t.0 .0);
            send(state, route, &format_topic_bindings(&bindings, current_thread)).await
        }
        SessionAction::List => {
            let overview = state.pool.session_overview(&route.context_id).await?;
            send(state, route, &format_session_list(&overview)).await
        }
        SessionAction::New => {
            let outcome = state.pool.create_session(&route.context_id).await?;
            state.details.clear(&route.context_id).await?;
            send(
                state,
                route,
                &format!(
                    "Started new session {} (previous: {}).",
                    outcome.next_session, outcome.previous_session
                ),
            )
            .await
        }
        SessionAction::Use(_) if route.is_supergroup => {
            send(
                state,
                route,
                "Session switching is disabled in group topics; every topic keeps its own conversation.",
            )
            .await
        }
        SessionAction::Use(reference) => {
            let overview = state.pool.session_overview(&route.context_id).await?;
            let file_name = match resolve_session_ref(&overview, &reference) {
                Ok(file_name) => file_name,
                Err(message) => return send(state, route, &message).await,
            };

            let outcome = state.pool.switch_session(&route.context_id, &file_name).await?;
            let text = if outcome.previous_session == outcome.next_session {
                format!("Already using {}.", outcome.next_session)
            } else {
                format!("Switched to {}.", outcome.next_session)
            };
            send(state, route, &text).await
        }
        SessionAction::Delete(None) if route.is_supergroup => {
            delete_topic_conversation(state, route).await
        }
        SessionAction::Delete(None) => {
            send(state, route, "Usage: /session delete <number|file>").await
        }
        SessionAction::Delete(Some(reference)) => {
            let overview = state.pool.session_overview(&route.context_id).await?;
            let file_name = match resolve_session_ref(&overview, &reference) {
                Ok(file_name) => file_name,
                Err(message) => return send(state, route, &message).await,
            };

            let outcome = state.pool.delete_session(&route.context_id, &file_name).await?;
            send(
                state,
                route,
                &format!(
                    "Deleted {}. Active session: {} ({} remaining).",
                    outcome.deleted_session,
                    outcome.active_session,
                    outcome.remaining_sessions.len()
                ),
            )
            .await
        }
    }
}

/// Deletes a supergroup topic's conversation: the forum topic goes
/// first, then the stored context. If the topic cannot be deleted the
/// context is kept, so data is never orphaned from a still-visible
/// topic.
async fn delete_topic_conversation(state: &AppState, route: &Route) -> Result<()> {
    if let Some(thread_id) = route.thread_id {
        if let Err(err) = state
            .outbound
            .delete_forum_topic(route.chat_id, thread_id)
            .await
        {
            warn!(
                context_id = %route.context_id,
                error = %err,
                "forum topic deletion failed, keeping conversation"
            );
            return send(
                state,
                route,
                "Could not delete this topic; the conversation was kept (operation rolled back).",
            )
            .await;
        }
    }

    state.pool.delete_context(&route.context_id).await?;
    info!(context_id = %route.context_id, "topic conversation deleted");

    // The topic is gone; the confirmation lands in the General topic.
    state
        .outbound
        .send_text(route.chat_id, None, "Topic conversation deleted.")
        .await?;
    Ok(())
}

async fn send(state: &AppState, route: &Route, text: &str) -> Result<()> {
    state
        .outbound
        .send_text(route.chat_id, route.thread_id, text)
        .await?;
    Ok(())
}

fn spawn_typing_loop(
    outbound: Outbound,
    chat_id: ChatId,
    thread_id: Option<ThreadId>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TYPING_REFRESH);
        loop {
            ticker.tick().await;
            if let Err(err) = outbound.typing(chat_id, thread_id).await {
                warn!(chat_id = chat_id.0, error = %err, "typing indicator failed");
            }
        }
    })
}

fn welcome_text() -> String {
    "Hi! Send me a message and I will forward it to the agent.\n\n\
     /reset starts a fresh conversation\n\
     /session manages stored session files\n\
     /details shows what the last answer did\n\
     /help lists all commands"
        .to_string()
}

/// Parsed `/session` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// List sessions (or topic conversations in a supergroup).
    List,
    /// Rotate to a brand-new session.
    New,
    /// Switch the active session.
    Use(String),
    /// Delete a session file, or the whole topic when no argument is
    /// given in a supergroup.
    Delete(Option<String>),
}

/// Parses the argument string of `/session`. Errors are usage strings
/// meant for the user.
pub fn parse_session_action(args: &str) -> std::result::Result<SessionAction, String> {
    let mut parts = args.split_whitespace();
    match parts.next() {
        None | Some("list") => Ok(SessionAction::List),
        Some("new") => Ok(SessionAction::New),
        Some("use") => parts
            .next()
            .map(|reference| SessionAction::Use(reference.to_string()))
            .ok_or_else(|| "Usage: /session use <number|file>".to_string()),
        Some("delete") => Ok(SessionAction::Delete(parts.next().map(str::to_string))),
        Some(other) => Err(format!(
            "Unknown subcommand '{other}'. Usage: /session list | new | use <n> | delete <n>"
        )),
    }
}

/// Resolves a user-supplied session reference: either a 1-based index
/// into the listed sessions or a full file name.
pub fn resolve_session_ref(
    overview: &SessionOverview,
    reference: &str,
) -> std::result::Result<String, String> {
    if let Ok(index) = reference.parse::<usize>() {
        if (1..=overview.sessions.len()).contains(&index) {
            return Ok(overview.sessions[index - 1].clone());
        }
        return Err(format!("No session #{reference}. See /session list."));
    }

    if overview.sessions.iter().any(|name| name == reference) {
        Ok(reference.to_string())
    } else {
        Err(format!("Unknown session '{reference}'. See /session list."))
    }
}

/// Formats a private chat's session list.
pub fn format_session_list(overview: &SessionOverview) -> String {
    let mut lines = vec![format!("Active session: {}", overview.active_session)];
    for (index, name) in overview.sessions.iter().enumerate() {
        let marker = if name == &overview.active_session {
            "*"
        } else {
            " "
        };
        lines.push(format!("{}) [{marker}] {name}", index + 1));
    }
    lines.push("Use /session use <number> to switch.".to_string());
    lines.join("\n")
}

/// Formats a supergroup's topic conversation list.
pub fn format_topic_bindings(bindings: &[TopicBinding], current_thread: Option<i32>) -> String {
    if bindings.is_empty() {
        return "No topic conversations in this group yet.".to_string();
    }

    let mut lines = vec!["Topic conversations in this group:".to_string()];
    for binding in bindings {
        let topic = binding
            .message_thread_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "general".to_string());
        let marker = if binding.message_thread_id == current_thread {
            " [*]"
        } else {
            ""
        };
        lines.push(format!(
            "- topic={topic} session={} sessions={}{marker}",
            binding.active_session, binding.session_count
        ));
    }
    lines.join("\n")
}

/// Formats the `/details` reply.
pub fn format_details(record: &PromptDetailsRecord) -> String {
    let mut lines = vec![
        "Latest answer details".to_string(),
        format!("Prompt: {}", record.prompt),
    ];

    if !record.tool_calls.is_empty() {
        lines.push("Tools:".to_string());
        for call in &record.tool_calls {
            lines.push(format!("- {}", format_tool_call(call)));
        }
    }

    lines.push(String::new());
    lines.push(record.full_text.clone());
    lines.join("\n")
}

fn format_tool_call(call: &ToolCallSummary) -> String {
    let mut parts = vec![call.tool_name.clone()];
    if let Some(args) = &call.args {
        for (key, value) in args {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            parts.push(format!("{key}={rendered}"));
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overview() -> SessionOverview {
        SessionOverview {
            active_session: "session-2026-02-15-b.jsonl".to_string(),
            sessions: vec![
                "session-2026-02-15-c.jsonl".to_string(),
                "session-2026-02-15-b.jsonl".to_string(),
                "session-2026-02-15-a.jsonl".to_string(),
            ],
        }
    }

    #[test]
    fn test_parse_session_action() {
        assert_eq!(parse_session_action(""), Ok(SessionAction::List));
        assert_eq!(parse_session_action("list"), Ok(SessionAction::List));
        assert_eq!(parse_session_action("new"), Ok(SessionAction::New));
        assert_eq!(
            parse_session_action("use 2"),
            Ok(SessionAction::Use("2".to_string()))
        );
        assert_eq!(parse_session_action("delete"), Ok(SessionAction::Delete(None)));
        assert_eq!(
            parse_session_action("delete session-x.jsonl"),
            Ok(SessionAction::Delete(Some("session-x.jsonl".to_string())))
        );

        assert!(parse_session_action("use").is_err());
        assert!(parse_session_action("frobnicate").is_err());
    }

    #[test]
    fn test_resolve_session_ref_by_index() {
        let overview = overview();
        assert_eq!(
            resolve_session_ref(&overview, "1").unwrap(),
            "session-2026-02-15-c.jsonl"
        );
        assert_eq!(
            resolve_session_ref(&overview, "3").unwrap(),
            "session-2026-02-15-a.jsonl"
        );
        assert!(resolve_session_ref(&overview, "4").is_err());
        assert!(resolve_session_ref(&overview, "0").is_err());
    }

    #[test]
    fn test_resolve_session_ref_by_name() {
        let overview = overview();
        assert_eq!(
            resolve_session_ref(&overview, "session-2026-02-15-b.jsonl").unwrap(),
            "session-2026-02-15-b.jsonl"
        );
        assert!(resolve_session_ref(&overview, "session-nope.jsonl").is_err());
    }

    #[test]
    fn test_format_session_list_marks_active() {
        let text = format_session_list(&overview());
        assert!(text.contains("Active session: session-2026-02-15-b.jsonl"));
        assert!(text.contains("1) [ ] session-2026-02-15-c.jsonl"));
        assert!(text.contains("2) [*] session-2026-02-15-b.jsonl"));
        assert!(text.contains("3) [ ] session-2026-02-15-a.jsonl"));
    }

    #[test]
    fn test_format_topic_bindings_marks_current() {
        let bindings = vec![
            TopicBinding {
                context_id: ContextId::from_string("supergroup--100123-topic-10"),
                chat_id: "-100123".to_string(),
                message_thread_id: Some(10),
                active_session: "session-a.jsonl".to_string(),
                session_count: 2,
            },
            TopicBinding {
                context_id: ContextId::from_string("supergroup--100123-topic-20"),
                chat_id: "-100123".to_string(),
                message_thread_id: Some(20),
                active_session: "session-b.jsonl".to_string(),
                session_count: 1,
            },
        ];

        let text = format_topic_bindings(&bindings, Some(20));
        assert!(text.contains("topic=10 session=session-a.jsonl sessions=2"));
        assert!(text.contains("topic=20 session=session-b.jsonl sessions=1 [*]"));
    }

    #[test]
    fn test_format_topic_bindings_empty() {
        assert!(format_topic_bindings(&[], None).contains("No topic conversations"));
    }

    #[test]
    fn test_format_details_includes_tools_and_text() {
        let record = PromptDetailsRecord {
            updated_at: Utc::now(),
            prompt: "analyze this".to_string(),
            full_text: "the final answer".to_string(),
            tool_calls: vec![ToolCallSummary {
                tool_call_id: "tool-1".to_string(),
                tool_name: "bash".to_string(),
                args: json!({"command": "ls -la"}).as_object().cloned(),
            }],
        };

        let text = format_details(&record);
        assert!(text.contains("Prompt: analyze this"));
        assert!(text.contains("- bash command=ls -la"));
        assert!(text.contains("the final answer"));
    }
}
