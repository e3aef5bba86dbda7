//! Process-backed agent runtime.
//!
//! Turns the raw RPC event stream into a single `prompt()` call: send
//! the prompt, accumulate streamed text deltas (optionally forwarding
//! them to a callback), wait for the agent to finish, then fetch the
//! authoritative final text.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::warn;

use courier_models::{ContextId, ToolCallSummary};

use crate::error::{Result, RuntimeError};
use crate::rpc::{ProcessStatus, RpcClient, RpcClientOptions, RpcResponse};

/// Callback invoked with the full accumulated text after each delta.
///
/// Returning an error aborts the in-flight prompt; streaming consumers
/// that must not abort should swallow their own failures.
pub type TextUpdateFn = Arc<dyn Fn(&str) -> std::result::Result<(), String> + Send + Sync>;

/// Options for one prompt call.
#[derive(Default, Clone)]
pub struct PromptOptions {
    /// Incremental delivery of the accumulated answer text.
    pub on_text_update: Option<TextUpdateFn>,
}

/// Result of one prompt call.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptResult {
    /// Final answer text.
    pub text: String,
    /// Tool invocations observed while the answer was produced.
    pub tool_calls: Vec<ToolCallSummary>,
}

/// A live agent conversation bound to one session file.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Sends a prompt and waits for the complete answer.
    async fn prompt(&self, message: &str, options: PromptOptions) -> Result<PromptResult>;

    /// True while the runtime can serve prompts.
    fn is_alive(&self) -> bool;

    /// Tears the runtime down. Idempotent.
    async fn dispose(&self);
}

/// Creates runtimes on demand; the pool owns exactly one per context.
pub trait RuntimeFactory: Send + Sync {
    /// Creates a runtime bound to the given session file.
    fn create(&self, context_id: &ContextId, session_path: &Path) -> Result<Arc<dyn AgentRuntime>>;
}

/// [`AgentRuntime`] backed by one RPC-mode agent process.
pub struct AgentProcessRuntime {
    client: RpcClient,
    alive: AtomicBool,
}

impl AgentProcessRuntime {
    /// Spawns the agent process for the given session file.
    pub fn spawn(options: RpcClientOptions) -> Result<Self> {
        let client = RpcClient::spawn(options)?;
        Ok(Self {
            client,
            alive: AtomicBool::new(true),
        })
    }

    async fn await_completion(
        &self,
        mut events: broadcast::Receiver<Value>,
        mut status: tokio::sync::watch::Receiver<ProcessStatus>,
        options: &PromptOptions,
    ) -> Result<(String, Vec<ToolCallSummary>)> {
        let mut streamed = String::new();
        let mut tool_calls = Vec::new();

        loop {
            tokio::select! {
                // Drain buffered events before reacting to an exit, so an
                // agent_end that raced the process teardown still wins.
                biased;

                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(delta) = extract_text_delta(&event) {
                            streamed.push_str(delta);
                            if let Some(on_text_update) = &options.on_text_update {
                                on_text_update(&streamed).map_err(RuntimeError::TextUpdate)?;
                            }
                        } else if let Some(tool_call) = extract_tool_call(&event) {
                            tool_calls.push(tool_call);
                        } else if is_agent_end(&event) {
                            return Ok((streamed, tool_calls));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event subscriber lagged, deltas may be missing");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(exited_while_waiting());
                    }
                },
                _ = status.changed() => {
                    if !matches!(*status.borrow(), ProcessStatus::Running) {
                        return Err(exited_while_waiting());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl AgentRuntime for AgentProcessRuntime {
    async fn prompt(&self, message: &str, options: PromptOptions) -> Result<PromptResult> {
        // Subscribe before the request goes out so deltas broadcast
        // between the response and the wait are not lost.
        let events = self.client.subscribe();
        let status = self.client.status();

        let response = self
            .client
            .request(json!({ "type": "prompt", "message": message }))
            .await?;
        ensure_success(&response, "prompt")?;

        let (streamed, tool_calls) = self.await_completion(events, status, &options).await?;

        let response = self
            .client
            .request(json!({ "type": "get_last_assistant_text" }))
            .await?;
        ensure_success(&response, "get_last_assistant_text")?;

        // The agent's stored text is authoritative; the accumulated
        // stream is the fallback.
        let text = response
            .data
            .as_ref()
            .and_then(|data| data.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(streamed);

        Ok(PromptResult { text, tool_calls })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.client.is_alive()
    }

    async fn dispose(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.client.dispose().await;
    }
}

/// Spawns [`AgentProcessRuntime`]s for the pool.
pub struct ProcessRuntimeFactory {
    bin: String,
    cwd: PathBuf,
    envs: Option<HashMap<String, String>>,
}

impl ProcessRuntimeFactory {
    /// Creates a factory launching `bin` with `cwd` as working directory.
    pub fn new(bin: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            cwd: cwd.into(),
            envs: None,
        }
    }

    /// Replaces the inherited environment for spawned processes.
    pub fn with_envs(mut self, envs: HashMap<String, String>) -> Self {
        self.envs = Some(envs);
        self
    }
}

impl RuntimeFactory for ProcessRuntimeFactory {
    fn create(&self, _context_id: &ContextId, session_path: &Path) -> Result<Arc<dyn AgentRuntime>> {
        let runtime = AgentProcessRuntime::spawn(RpcClientOptions {
            bin: self.bin.clone(),
            session_path: session_path.to_path_buf(),
            cwd: self.cwd.clone(),
            envs: self.envs.clone(),
        })?;
        Ok(Arc::new(runtime))
    }
}

fn ensure_success(response: &RpcResponse, command: &str) -> Result<()> {
    if response.success {
        return Ok(());
    }
    let message = response
        .error
        .clone()
        .unwrap_or_else(|| format!("RPC command '{command}' failed"));
    Err(RuntimeError::CommandFailed(message))
}

fn exited_while_waiting() -> RuntimeError {
    RuntimeError::ProcessExited(
        "agent process exited while waiting for prompt completion".to_string(),
    )
}

/// Extracts the text delta from a `message_update` event, if present.
pub fn extract_text_delta(event: &Value) -> Option<&str> {
    if event.get("type").and_then(Value::as_str) != Some("message_update") {
        return None;
    }
    let assistant = event.get("assistantMessageEvent")?;
    if assistant.get("type").and_then(Value::as_str) != Some("text_delta") {
        return None;
    }
    assistant.get("delta").and_then(Value::as_str)
}

/// Extracts a tool-call summary from a `message_update` event, if present.
pub fn extract_tool_call(event: &Value) -> Option<ToolCallSummary> {
    if event.get("type").and_then(Value::as_str) != Some("message_update") {
        return None;
    }
    let assistant = event.get("assistantMessageEvent")?;
    if assistant.get("type").and_then(Value::as_str) != Some("toolcall") {
        return None;
    }

    let tool_call_id = assistant.get("toolCallId").and_then(Value::as_str)?;
    let tool_name = assistant.get("toolName").and_then(Value::as_str)?;
    let args = assistant
        .get("args")
        .and_then(Value::as_object)
        .cloned();

    Some(ToolCallSummary {
        tool_call_id: tool_call_id.to_string(),
        tool_name: tool_name.to_string(),
        args,
    })
}

fn is_agent_end(event: &Value) -> bool {
    event.get("type").and_then(Value::as_str) == Some("agent_end")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_text_delta() {
        let event = json!({
            "type": "message_update",
            "assistantMessageEvent": { "type": "text_delta", "delta": "hello" }
        });
        assert_eq!(extract_text_delta(&event), Some("hello"));
    }

    #[test]
    fn test_extract_text_delta_ignores_other_shapes() {
        for event in [
            json!({"type": "agent_end"}),
            json!({"type": "message_update"}),
            json!({"type": "message_update", "assistantMessageEvent": {"type": "thinking"}}),
            json!({"type": "message_update", "assistantMessageEvent": {"type": "text_delta", "delta": 5}}),
        ] {
            assert_eq!(extract_text_delta(&event), None, "event: {event}");
        }
    }

    #[test]
    fn test_extract_tool_call() {
        let event = json!({
            "type": "message_update",
            "assistantMessageEvent": {
                "type": "toolcall",
                "toolCallId": "tool-1",
                "toolName": "bash",
                "args": { "command": "ls" }
            }
        });

        let tool_call = extract_tool_call(&event).unwrap();
        assert_eq!(tool_call.tool_call_id, "tool-1");
        assert_eq!(tool_call.tool_name, "bash");
        assert_eq!(
            tool_call.args.unwrap().get("command").unwrap(),
            &json!("ls")
        );
    }

    #[test]
    fn test_extract_tool_call_requires_id_and_name() {
        let event = json!({
            "type": "message_update",
            "assistantMessageEvent": { "type": "toolcall", "toolName": "bash" }
        });
        assert!(extract_tool_call(&event).is_none());
    }

    #[test]
    fn test_is_agent_end() {
        assert!(is_agent_end(&json!({"type": "agent_end"})));
        assert!(!is_agent_end(&json!({"type": "message_update"})));
    }

    #[test]
    fn test_ensure_success_uses_reported_error() {
        let response = RpcResponse {
            id: "req-0".to_string(),
            command: "prompt".to_string(),
            success: false,
            data: None,
            error: Some("model unavailable".to_string()),
        };

        let err = ensure_success(&response, "prompt").unwrap_err();
        assert!(matches!(err, RuntimeError::CommandFailed(message) if message == "model unavailable"));
    }

    #[test]
    fn test_ensure_success_generic_message() {
        let response = RpcResponse {
            id: "req-0".to_string(),
            command: "prompt".to_string(),
            success: false,
            data: None,
            error: None,
        };

        let err = ensure_success(&response, "prompt").unwrap_err();
        assert!(
            matches!(err, RuntimeError::CommandFailed(message) if message == "RPC command 'prompt' failed")
        );
    }
}
