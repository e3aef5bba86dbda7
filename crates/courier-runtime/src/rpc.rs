//! Line-delimited JSON RPC client over an agent child process.
//!
//! The client owns exactly one external process, spawned as
//! `<bin> --mode rpc --session <path>`, and speaks newline-delimited JSON
//! over its standard streams:
//!
//! - Requests carry an injected unique `id` (`req-<counter>`).
//! - Lines with `type: "response"` and a known `id` complete the matching
//!   pending request; unmatched or malformed lines are dropped.
//! - Every other parsed line is an unsolicited event, broadcast to all
//!   subscribers.
//!
//! Process liveness is a watch channel updated by the wait task, never
//! re-derived from OS state at call time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{Result, RuntimeError};

/// Broadcast capacity for unsolicited events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of the agent process behind an [`RpcClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The process is running and the client accepts requests.
    Running,
    /// The process terminated on its own (normal exit or signal).
    Exited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
    },
    /// The client was explicitly disposed.
    Disposed,
}

/// A response line from the agent process.
#[derive(Debug, Clone)]
pub struct RpcResponse {
    /// Request id this response answers.
    pub id: String,
    /// Command name echoed by the agent.
    pub command: String,
    /// Whether the command succeeded.
    pub success: bool,
    /// Command-specific payload.
    pub data: Option<Value>,
    /// Agent-reported error message when `success` is false.
    pub error: Option<String>,
}

/// Options for spawning the agent process.
#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    /// Path or name of the agent binary.
    pub bin: String,
    /// Session file the process appends to.
    pub session_path: PathBuf,
    /// Working directory for the process.
    pub cwd: PathBuf,
    /// Replacement environment; inherits the parent's when `None`.
    pub envs: Option<HashMap<String, String>>,
}

type PendingMap = Mutex<HashMap<String, oneshot::Sender<Result<RpcResponse>>>>;

/// Owns one agent process and multiplexes requests and events over its
/// standard streams.
pub struct RpcClient {
    stdin: Mutex<ChildStdin>,
    pending: Arc<PendingMap>,
    events_tx: broadcast::Sender<Value>,
    status_tx: Arc<watch::Sender<ProcessStatus>>,
    status_rx: watch::Receiver<ProcessStatus>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Spawns the agent process and wires up its streams.
    ///
    /// # Errors
    /// Returns an IO error if the process cannot be spawned. Spawn
    /// failure is not retried here; recreate policy lives in the pool.
    pub fn spawn(options: RpcClientOptions) -> Result<Self> {
        let mut command = Command::new(&options.bin);
        command
            .arg("--mode")
            .arg("rpc")
            .arg("--session")
            .arg(&options.session_path)
            .current_dir(&options.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(envs) = &options.envs {
            command.env_clear().envs(envs);
        }

        let mut child = command.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "agent stdin not captured")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "agent stdout not captured")
        })?;
        let stderr = child.stderr.take();

        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(ProcessStatus::Running);
        let status_tx = Arc::new(status_tx);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        // Line reader: routes responses to pending requests and
        // broadcasts everything else as events.
        {
            let pending = Arc::clone(&pending);
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    Self::route_line(&pending, &events_tx, &line).await;
                }
                trace!("agent stdout closed");
            });
        }

        // Drain stderr so the process can never block on it.
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "agent stderr");
                }
            });
        }

        // Wait task: owns the child, observes its exit, and performs the
        // kill requested by dispose().
        {
            let pending = Arc::clone(&pending);
            let status_tx = Arc::clone(&status_tx);
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill_rx => {
                        let _ = child.start_kill();
                        child.wait().await
                    }
                };

                let code = status.ok().and_then(|s| s.code());
                let was_disposed = !status_tx.send_if_modified(|current| {
                    if *current == ProcessStatus::Disposed {
                        false
                    } else {
                        *current = ProcessStatus::Exited { code };
                        true
                    }
                });

                if !was_disposed {
                    debug!(code = ?code, "agent process exited");
                }
                Self::reject_all(&pending, || {
                    RuntimeError::ProcessExited(format!("agent process exited (code={code:?})"))
                })
                .await;
            });
        }

        Ok(Self {
            stdin: Mutex::new(stdin),
            pending,
            events_tx,
            status_tx,
            status_rx,
            kill_tx: Mutex::new(Some(kill_tx)),
            next_id: AtomicU64::new(0),
        })
    }

    /// Sends a request and awaits the matching response.
    ///
    /// The request must be a JSON object; a unique `id` is injected
    /// before writing. The returned future completes when a response line
    /// with that id arrives, and fails if the client is disposed or the
    /// process exits first.
    pub async fn request(&self, request: Value) -> Result<RpcResponse> {
        match *self.status_rx.borrow() {
            ProcessStatus::Running => {}
            ProcessStatus::Disposed => return Err(RuntimeError::ClientDisposed),
            ProcessStatus::Exited { code } => {
                return Err(RuntimeError::ProcessExited(format!(
                    "agent process exited (code={code:?})"
                )))
            }
        }

        let Value::Object(mut payload) = request else {
            return Err(RuntimeError::CommandFailed(
                "RPC request must be a JSON object".to_string(),
            ));
        };

        let id = format!("req-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        payload.insert("id".to_string(), Value::String(id.clone()));

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let mut line = serde_json::to_string(&Value::Object(payload))?;
        line.push('\n');

        let write = async {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        if let Err(err) = write.await {
            self.pending.lock().await.remove(&id);
            return Err(err.into());
        }

        match rx.await {
            Ok(result) => result,
            // Sender dropped without completing: the client went away.
            Err(_) => Err(RuntimeError::ClientDisposed),
        }
    }

    /// Subscribes to unsolicited events. Dropping the receiver
    /// unsubscribes; every receiver sees every event once.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.events_tx.subscribe()
    }

    /// Returns a watch over the process status. The receiver observes
    /// the transition out of `Running` exactly once.
    pub fn status(&self) -> watch::Receiver<ProcessStatus> {
        self.status_rx.clone()
    }

    /// True iff the client is not disposed and the process has not exited.
    pub fn is_alive(&self) -> bool {
        matches!(*self.status_rx.borrow(), ProcessStatus::Running)
    }

    /// Disposes the client: kills the process if still running and fails
    /// all pending requests. Idempotent.
    pub async fn dispose(&self) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == ProcessStatus::Disposed {
                false
            } else {
                *current = ProcessStatus::Disposed;
                true
            }
        });
        if !changed {
            return;
        }

        if let Some(kill) = self.kill_tx.lock().await.take() {
            let _ = kill.send(());
        }

        Self::reject_all(&self.pending, || RuntimeError::ClientDisposed).await;
    }

    async fn route_line(pending: &PendingMap, events_tx: &broadcast::Sender<Value>, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            // Malformed lines are dropped silently.
            return;
        };
        if !value.is_object() {
            return;
        }

        if value.get("type").and_then(Value::as_str) == Some("response") {
            let Some(id) = value.get("id").and_then(Value::as_str) else {
                return;
            };

            let Some(tx) = pending.lock().await.remove(id) else {
                // Unknown id: response is dropped.
                return;
            };

            let response = RpcResponse {
                id: id.to_string(),
                command: value
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
                data: value.get("data").cloned(),
                error: value
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            let _ = tx.send(Ok(response));
            return;
        }

        // Anything that is not a response is an event.
        if events_tx.send(value).is_err() {
            trace!("event dropped: no subscribers");
        }
    }

    async fn reject_all(pending: &PendingMap, make_error: impl Fn() -> RuntimeError) {
        let senders: Vec<_> = pending.lock().await.drain().collect();
        if !senders.is_empty() {
            warn!(count = senders.len(), "rejecting pending RPC requests");
        }
        for (_, tx) in senders {
            let _ = tx.send(Err(make_error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn pending_with(id: &str) -> (Arc<PendingMap>, oneshot::Receiver<Result<RpcResponse>>) {
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(id.to_string(), tx);
        (pending, rx)
    }

    #[tokio::test]
    async fn test_route_line_resolves_matching_response() {
        let (pending, rx) = pending_with("req-0").await;
        let (events_tx, _events_rx) = broadcast::channel(8);

        let line = json!({
            "type": "response",
            "id": "req-0",
            "command": "prompt",
            "success": true,
            "data": {"ok": true}
        })
        .to_string();
        RpcClient::route_line(&pending, &events_tx, &line).await;

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.id, "req-0");
        assert_eq!(response.command, "prompt");
        assert!(response.success);
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_route_line_drops_unknown_ids_and_garbage() {
        let (pending, mut rx) = pending_with("req-0").await;
        let (events_tx, _events_rx) = broadcast::channel(8);

        RpcClient::route_line(&pending, &events_tx, "not json at all").await;
        RpcClient::route_line(&pending, &events_tx, "[1, 2, 3]").await;
        RpcClient::route_line(
            &pending,
            &events_tx,
            &json!({"type": "response", "id": "req-99", "success": true}).to_string(),
        )
        .await;
        RpcClient::route_line(
            &pending,
            &events_tx,
            &json!({"type": "response", "success": true}).to_string(),
        )
        .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(pending.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_route_line_broadcasts_non_response_objects() {
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, mut events_rx) = broadcast::channel(8);

        let event = json!({"type": "agent_end"});
        RpcClient::route_line(&pending, &events_tx, &event.to_string()).await;

        assert_eq!(events_rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_response_failure_fields_are_carried() {
        let (pending, rx) = pending_with("req-1").await;
        let (events_tx, _events_rx) = broadcast::channel(8);

        let line = json!({
            "type": "response",
            "id": "req-1",
            "command": "prompt",
            "success": false,
            "error": "model unavailable"
        })
        .to_string();
        RpcClient::route_line(&pending, &events_tx, &line).await;

        let response = rx.await.unwrap().unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("model unavailable"));
    }
}
