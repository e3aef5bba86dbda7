//! Agent process pool and RPC runtime for Courier.
//!
//! This crate manages one long-lived external agent process per
//! conversation context:
//! - `SerialQueue` - per-context FIFO serializer; one in-flight
//!   operation per context, independent contexts in parallel
//! - `RpcClient` - owns one agent process and speaks newline-delimited
//!   JSON requests, responses, and events over its standard streams
//! - `AgentProcessRuntime` - the `prompt()` contract on top of the RPC
//!   stream: send, accumulate streamed deltas, await completion, fetch
//!   the final text
//! - `AgentPool` - the orchestrator: lazily created runtimes, crash
//!   recovery on next use, idle sweeping, and session operations kept
//!   consistent with runtime lifecycle
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use courier_models::ContextId;
//! use courier_runtime::{AgentPool, PoolConfig, ProcessRuntimeFactory, PromptOptions};
//! use courier_storage::SessionStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sessions = Arc::new(SessionStore::new("data/sessions"));
//!     let factory = Arc::new(ProcessRuntimeFactory::new("pi", "."));
//!     let pool = AgentPool::new(PoolConfig::default(), factory, sessions);
//!
//!     let context = ContextId::from_string("chat-1");
//!     let result = pool
//!         .run_prompt(&context, "hello", PromptOptions::default())
//!         .await?;
//!     println!("{}", result.text);
//!
//!     pool.dispose().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pool;
pub mod process;
pub mod queue;
pub mod rpc;

pub use config::PoolConfig;
pub use error::{Result, RuntimeError};
pub use pool::{AgentPool, SessionDeleteOutcome, SessionOverview, SessionSwitchOutcome};
pub use process::{
    AgentProcessRuntime, AgentRuntime, ProcessRuntimeFactory, PromptOptions, PromptResult,
    RuntimeFactory, TextUpdateFn,
};
pub use queue::SerialQueue;
pub use rpc::{ProcessStatus, RpcClient, RpcClientOptions, RpcResponse};
