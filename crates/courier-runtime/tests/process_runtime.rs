//! End-to-end prompt tests for the process-backed runtime.

#![cfg(unix)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::tempdir;
use tokio::time::timeout;

use courier_runtime::{
    AgentProcessRuntime, AgentRuntime, PromptOptions, RpcClientOptions, RuntimeError,
};

use common::{write_agent_script, DYING_AGENT, SCRIPTED_AGENT};

const WAIT: Duration = Duration::from_secs(10);

fn runtime_for(dir: &tempfile::TempDir, script: &str) -> AgentProcessRuntime {
    let bin = write_agent_script(dir.path(), "agent.sh", script);

    AgentProcessRuntime::spawn(RpcClientOptions {
        bin: bin.to_string_lossy().into_owned(),
        session_path: dir.path().join("session-test.jsonl"),
        cwd: dir.path().to_path_buf(),
        envs: None,
    })
    .unwrap()
}

#[tokio::test]
async fn prompt_streams_and_returns_authoritative_text() {
    let dir = tempdir().unwrap();
    let runtime = runtime_for(&dir, SCRIPTED_AGENT);

    let snapshots: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&snapshots);
    let options = PromptOptions {
        on_text_update: Some(Arc::new(move |text: &str| {
            sink.lock().unwrap().push(text.to_string());
            Ok(())
        })),
    };

    let result = timeout(WAIT, runtime.prompt("hi", options))
        .await
        .unwrap()
        .unwrap();

    // get_last_assistant_text wins over the accumulated stream.
    assert_eq!(result.text, "Hello world!");
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].tool_name, "bash");

    let snapshots = snapshots.lock().unwrap().clone();
    assert_eq!(snapshots, vec!["Hello".to_string(), "Hello world".to_string()]);

    runtime.dispose().await;
    assert!(!runtime.is_alive());
}

#[tokio::test]
async fn failing_text_update_callback_aborts_the_prompt() {
    let dir = tempdir().unwrap();
    let runtime = runtime_for(&dir, SCRIPTED_AGENT);

    let options = PromptOptions {
        on_text_update: Some(Arc::new(|_text: &str| Err("consumer failed".to_string()))),
    };

    let result = timeout(WAIT, runtime.prompt("hi", options)).await.unwrap();
    assert!(
        matches!(result, Err(RuntimeError::TextUpdate(ref message)) if message == "consumer failed")
    );

    runtime.dispose().await;
}

#[tokio::test]
async fn process_death_mid_prompt_fails_the_wait() {
    let dir = tempdir().unwrap();
    let runtime = runtime_for(&dir, DYING_AGENT);

    let result = timeout(WAIT, runtime.prompt("hi", PromptOptions::default()))
        .await
        .unwrap();

    match result {
        Err(RuntimeError::ProcessExited(message)) => {
            assert!(message.contains("waiting for prompt completion"), "{message}");
        }
        other => panic!("expected ProcessExited, got {other:?}"),
    }

    // The runtime reports dead so the pool will replace it.
    assert!(!runtime.is_alive());
}

#[tokio::test]
async fn dispose_marks_runtime_not_alive() {
    let dir = tempdir().unwrap();
    let runtime = runtime_for(&dir, SCRIPTED_AGENT);

    assert!(runtime.is_alive());
    runtime.dispose().await;
    runtime.dispose().await;
    assert!(!runtime.is_alive());

    let result = runtime.prompt("hi", PromptOptions::default()).await;
    assert!(matches!(result, Err(RuntimeError::ClientDisposed)));
}
