//! Shared harness for integration tests: a scripted `/bin/sh` stand-in
//! for the agent binary. The script honors the spawn contract (it is
//! invoked as `<bin> --mode rpc --session <path>` and simply ignores the
//! arguments) and answers the line-delimited JSON protocol.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// An agent that answers prompts with a short streamed conversation.
pub const SCRIPTED_AGENT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"type":"prompt"'*)
      printf '{"type":"response","id":"%s","command":"prompt","success":true}\n' "$id"
      printf '{"type":"message_update","assistantMessageEvent":{"type":"text_delta","delta":"Hello"}}\n'
      printf '{"type":"message_update","assistantMessageEvent":{"type":"text_delta","delta":" world"}}\n'
      printf '{"type":"message_update","assistantMessageEvent":{"type":"toolcall","toolCallId":"tool-1","toolName":"bash","args":{"command":"ls"}}}\n'
      printf 'this line is not JSON and must be ignored\n'
      printf '{"type":"agent_end"}\n'
      ;;
    *'"type":"get_last_assistant_text"'*)
      printf '{"type":"response","id":"%s","command":"get_last_assistant_text","success":true,"data":{"text":"Hello world!"}}\n' "$id"
      ;;
    *'"type":"fail"'*)
      printf '{"type":"response","id":"%s","command":"fail","success":false,"error":"told to fail"}\n' "$id"
      ;;
    *'"type":"exit"'*)
      exit 7
      ;;
    *)
      printf '{"type":"response","id":"%s","command":"echo","success":true}\n' "$id"
      ;;
  esac
done
"#;

/// An agent that accepts the prompt but dies before `agent_end`.
pub const DYING_AGENT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"type":"prompt"'*)
      printf '{"type":"response","id":"%s","command":"prompt","success":true}\n' "$id"
      printf '{"type":"message_update","assistantMessageEvent":{"type":"text_delta","delta":"partial"}}\n'
      exit 3
      ;;
  esac
done
"#;

/// Writes an executable agent script into `dir` and returns its path.
pub fn write_agent_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
