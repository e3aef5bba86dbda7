//! Per-context agent pool.
//!
//! The pool owns every live agent runtime and the per-context serial
//! queues that order work against them. Per context, the lifecycle is:
//! absent -> active (runtime live) -> idle (queue idle, aging) ->
//! disposed (runtime torn down) -> active again on demand.
//!
//! Disposing a runtime is cheap resource management and never touches
//! session data; deleting session data is an explicit, user-initiated
//! operation. The pool keeps those two strictly apart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info};

use courier_models::{parse_supergroup_topic_key, ContextId, TopicBinding};
use courier_storage::SessionStore;

use crate::config::PoolConfig;
use crate::error::Result;
use crate::process::{AgentRuntime, PromptOptions, PromptResult, RuntimeFactory};
use crate::queue::{QueuePermit, SerialQueue};

/// A context's session files as presented to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOverview {
    /// Base name of the active session file.
    pub active_session: String,
    /// All session file names, newest first.
    pub sessions: Vec<String>,
}

/// Outcome of rotating or switching the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSwitchOutcome {
    /// Active session file before the operation.
    pub previous_session: String,
    /// Active session file after the operation.
    pub next_session: String,
}

/// Outcome of deleting a session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDeleteOutcome {
    /// The removed session file.
    pub deleted_session: String,
    /// Whether it was the active one.
    pub was_active: bool,
    /// Active session file before the deletion.
    pub previous_active_session: String,
    /// Active session file after the deletion.
    pub active_session: String,
    /// Session files left in the context, newest first.
    pub remaining_sessions: Vec<String>,
}

struct RuntimeEntry {
    runtime: Arc<dyn AgentRuntime>,
    last_used_at: Instant,
}

struct PoolInner {
    queues: Mutex<HashMap<ContextId, Arc<SerialQueue>>>,
    entries: Mutex<HashMap<ContextId, RuntimeEntry>>,
    idle_ttl: std::time::Duration,
    factory: Arc<dyn RuntimeFactory>,
    sessions: Arc<SessionStore>,
}

/// Orchestrates one serial queue and at most one live agent runtime per
/// context, with idle sweeping and session operations that keep runtime
/// lifecycle and session files consistent.
pub struct AgentPool {
    inner: Arc<PoolInner>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentPool {
    /// Creates a pool and starts its background sweep timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn RuntimeFactory>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            queues: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
            idle_ttl: config.idle_ttl,
            factory,
            sessions,
        });

        let sweep_inner = Arc::clone(&inner);
        let sweep_interval = config.sweep_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep_inner.sweep_idle(Instant::now()).await;
            }
        });

        Self {
            inner,
            sweep_handle: Mutex::new(Some(handle)),
        }
    }

    /// Runs a prompt against the context's agent, creating or replacing
    /// the runtime as needed.
    ///
    /// A runtime that died since its last use is detected here, lazily,
    /// and replaced without surfacing anything to the caller.
    pub async fn run_prompt(
        &self,
        context_id: &ContextId,
        message: &str,
        options: PromptOptions,
    ) -> Result<PromptResult> {
        let permit = self.inner.enter(context_id).await;
        let inner = &self.inner;

        permit
            .run(async move {
                let runtime = inner.runtime(context_id).await?;
                inner.touch(context_id).await;
                let result = runtime.prompt(message, options).await;
                inner.touch(context_id).await;
                result
            })
            .await
    }

    /// Soft-resets the conversation: same as [`Self::create_session`].
    pub async fn reset(&self, context_id: &ContextId) -> Result<()> {
        self.create_session(context_id).await.map(|_| ())
    }

    /// Returns the context's session files.
    pub async fn session_overview(&self, context_id: &ContextId) -> Result<SessionOverview> {
        let permit = self.inner.enter(context_id).await;
        let inner = &self.inner;

        permit
            .run(async move {
                let state = inner.sessions.session_state(context_id).await?;
                Ok(SessionOverview {
                    active_session: state.active_file_name,
                    sessions: state.session_file_names,
                })
            })
            .await
    }

    /// Rotates the context to a brand-new session file and disposes the
    /// current runtime, so the next prompt binds to the fresh file.
    /// Prior history is preserved.
    pub async fn create_session(&self, context_id: &ContextId) -> Result<SessionSwitchOutcome> {
        let permit = self.inner.enter(context_id).await;
        let inner = &self.inner;

        permit
            .run(async move {
                let rotated = inner.sessions.rotate_session(context_id).await?;
                inner.dispose_entry(context_id).await;

                let outcome = SessionSwitchOutcome {
                    previous_session: file_name(&rotated.previous_path),
                    next_session: file_name(&rotated.next_path),
                };
                info!(
                    context_id = %context_id,
                    previous_session = %outcome.previous_session,
                    next_session = %outcome.next_session,
                    "session rotated"
                );
                Ok(outcome)
            })
            .await
    }

    /// Repoints the context to an existing session file.
    ///
    /// The runtime is disposed only when the active file actually
    /// changes; switching to the already-active session must not cause
    /// process churn.
    pub async fn switch_session(
        &self,
        context_id: &ContextId,
        session_file_name: &str,
    ) -> Result<SessionSwitchOutcome> {
        let permit = self.inner.enter(context_id).await;
        let inner = &self.inner;

        permit
            .run(async move {
                let switched = inner
                    .sessions
                    .switch_session(context_id, session_file_name)
                    .await?;
                let outcome = SessionSwitchOutcome {
                    previous_session: file_name(&switched.previous_path),
                    next_session: file_name(&switched.next_path),
                };

                if switched.previous_path != switched.next_path {
                    inner.dispose_entry(context_id).await;
                    info!(
                        context_id = %context_id,
                        previous_session = %outcome.previous_session,
                        next_session = %outcome.next_session,
                        "session switched"
                    );
                }

                Ok(outcome)
            })
            .await
    }

    /// Deletes one of the context's session files.
    pub async fn delete_session(
        &self,
        context_id: &ContextId,
        session_file_name: &str,
    ) -> Result<SessionDeleteOutcome> {
        let permit = self.inner.enter(context_id).await;
        let inner = &self.inner;

        permit
            .run(async move {
                let deleted = inner
                    .sessions
                    .delete_session(context_id, session_file_name)
                    .await?;
                if deleted.was_active {
                    inner.dispose_entry(context_id).await;
                }

                let outcome = SessionDeleteOutcome {
                    deleted_session: file_name(&deleted.deleted_path),
                    was_active: deleted.was_active,
                    previous_active_session: file_name(&deleted.previous_active_path),
                    active_session: file_name(&deleted.next_active_path),
                    remaining_sessions: deleted.remaining_session_file_names,
                };
                info!(
                    context_id = %context_id,
                    deleted_session = %outcome.deleted_session,
                    was_active = outcome.was_active,
                    active_session = %outcome.active_session,
                    remaining_count = outcome.remaining_sessions.len(),
                    "session deleted"
                );
                Ok(outcome)
            })
            .await
    }

    /// Removes the context entirely: runtime disposed, all session files
    /// and the pointer deleted.
    pub async fn delete_context(&self, context_id: &ContextId) -> Result<()> {
        let permit = self.inner.enter(context_id).await;
        let inner = &self.inner;

        permit
            .run(async move {
                inner.dispose_entry(context_id).await;
                inner.sessions.delete_context(context_id).await?;
                info!(context_id = %context_id, "context deleted");
                Ok(())
            })
            .await
    }

    /// Enumerates the supergroup-topic contexts of one chat, sorted with
    /// the General topic first, then ascending thread ids.
    pub async fn list_supergroup_topic_bindings(&self, chat_id: &str) -> Result<Vec<TopicBinding>> {
        let context_ids = self.inner.sessions.list_context_ids().await?;

        let mut bindings = Vec::new();
        for context_id in context_ids {
            let Some(key) = parse_supergroup_topic_key(&context_id) else {
                continue;
            };
            if key.chat_id != chat_id {
                continue;
            }

            let state = self.inner.sessions.session_state(&context_id).await?;
            bindings.push(TopicBinding {
                context_id,
                chat_id: key.chat_id,
                message_thread_id: key.message_thread_id,
                active_session: state.active_file_name,
                session_count: state.session_file_names.len(),
            });
        }

        bindings.sort_by_key(|binding| match binding.message_thread_id {
            None => (0, 0),
            Some(thread_id) => (1, thread_id),
        });
        Ok(bindings)
    }

    /// Disposes runtimes whose queue is idle and whose last use is older
    /// than the idle TTL. Session files are never touched.
    pub async fn sweep_idle(&self, now: Instant) {
        self.inner.sweep_idle(now).await;
    }

    /// Stops the sweep timer and disposes every tracked runtime.
    pub async fn dispose(&self) {
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            handle.abort();
        }

        let context_ids: Vec<ContextId> = self.inner.entries.lock().await.keys().cloned().collect();
        for context_id in context_ids {
            self.inner.dispose_entry(&context_id).await;
        }
        self.inner.queues.lock().await.clear();
    }
}

impl PoolInner {
    /// Claims a slot on the context's queue. Reserving under the
    /// registry lock pins the queue: the sweeper only removes queues it
    /// observes idle under the same lock.
    async fn enter(&self, context_id: &ContextId) -> QueuePermit {
        let mut queues = self.queues.lock().await;
        queues.entry(context_id.clone()).or_default().reserve()
    }

    async fn runtime(&self, context_id: &ContextId) -> Result<Arc<dyn AgentRuntime>> {
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(context_id) {
                if entry.runtime.is_alive() {
                    return Ok(Arc::clone(&entry.runtime));
                }
            }
        }

        // Missing, or dead since its last use: replace it.
        self.dispose_entry(context_id).await;

        let session_path = self.sessions.active_session_path(context_id).await?;
        let runtime = self.factory.create(context_id, &session_path)?;

        self.entries.lock().await.insert(
            context_id.clone(),
            RuntimeEntry {
                runtime: Arc::clone(&runtime),
                last_used_at: Instant::now(),
            },
        );

        info!(
            context_id = %context_id,
            session = %session_path.display(),
            "runtime created"
        );
        Ok(runtime)
    }

    async fn touch(&self, context_id: &ContextId) {
        if let Some(entry) = self.entries.lock().await.get_mut(context_id) {
            entry.last_used_at = Instant::now();
        }
    }

    async fn dispose_entry(&self, context_id: &ContextId) {
        let entry = self.entries.lock().await.remove(context_id);
        if let Some(entry) = entry {
            entry.runtime.dispose().await;
            info!(context_id = %context_id, "runtime disposed");
        }
    }

    async fn sweep_idle(&self, now: Instant) {
        let snapshot: Vec<(ContextId, Instant)> = self
            .entries
            .lock()
            .await
            .iter()
            .map(|(context_id, entry)| (context_id.clone(), entry.last_used_at))
            .collect();

        for (context_id, last_used_at) in snapshot {
            let queue_idle = {
                let queues = self.queues.lock().await;
                queues.get(&context_id).map(|q| q.is_idle()).unwrap_or(true)
            };
            if !queue_idle {
                continue;
            }

            let inactive_for = now.saturating_duration_since(last_used_at);
            if inactive_for < self.idle_ttl {
                continue;
            }

            self.dispose_entry(&context_id).await;

            let mut queues = self.queues.lock().await;
            if queues.get(&context_id).map(|q| q.is_idle()).unwrap_or(false) {
                queues.remove(&context_id);
            }
            debug!(
                context_id = %context_id,
                inactive_ms = inactive_for.as_millis() as u64,
                "runtime swept"
            );
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
