//! Configuration for the Telegram bridge.
//!
//! Everything is environment-driven, optionally pre-loaded from a dotenv
//! file (see `main.rs`). Real environment variables always win over the
//! file.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `TELEGRAM_BOT_TOKEN` | required | Bot token from @BotFather |
//! | `TELEGRAM_ALLOWED_USER_IDS` | required | Comma-separated user ids |
//! | `AGENT_BIN` | `pi` | Agent binary to spawn |
//! | `AGENT_CWD` | current dir | Working directory for the agent (`~` ok) |
//! | `TELEGRAM_DATA_DIR` | `~/.courier` | Data root; sessions live below it |
//! | `TELEGRAM_IDLE_TTL_MS` | `1200000` | Idle TTL before agent recycling |
//! | `TELEGRAM_STREAM_EDIT_THROTTLE_MS` | `600` | Min delay between stream edits |
//! | `TELEGRAM_PARSE_MODE` | `markdown` | `none`, `markdown`, `markdownv2`, `html` |

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use teloxide::types::ParseMode;

use crate::error::{Result, TelegramError};

const DEFAULT_IDLE_TTL_MS: u64 = 20 * 60 * 1000;
const DEFAULT_STREAM_EDIT_THROTTLE_MS: u64 = 600;
const DEFAULT_AGENT_BIN: &str = "pi";
const DEFAULT_DATA_DIR_NAME: &str = ".courier";

/// How outbound text should be formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseModeSetting {
    /// Plain text, no formatting.
    None,
    /// Legacy Markdown.
    #[default]
    Markdown,
    /// MarkdownV2.
    MarkdownV2,
    /// HTML.
    Html,
}

impl ParseModeSetting {
    /// The teloxide parse mode to attach to outbound requests, if any.
    pub fn to_parse_mode(self) -> Option<ParseMode> {
        match self {
            ParseModeSetting::None => None,
            ParseModeSetting::Markdown => Some(ParseMode::Markdown),
            ParseModeSetting::MarkdownV2 => Some(ParseMode::MarkdownV2),
            ParseModeSetting::Html => Some(ParseMode::Html),
        }
    }
}

impl FromStr for ParseModeSetting {
    type Err = TelegramError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" => Ok(ParseModeSetting::None),
            "markdown" => Ok(ParseModeSetting::Markdown),
            "markdownv2" => Ok(ParseModeSetting::MarkdownV2),
            "html" => Ok(ParseModeSetting::Html),
            other => Err(TelegramError::Config(format!(
                "invalid TELEGRAM_PARSE_MODE: '{other}'"
            ))),
        }
    }
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Bot token.
    pub telegram_bot_token: String,
    /// Users allowed to talk to the bridge; everyone else is ignored.
    pub allowed_user_ids: HashSet<u64>,
    /// Agent binary to spawn per context.
    pub agent_bin: String,
    /// Working directory for spawned agents.
    pub agent_cwd: PathBuf,
    /// Data root directory.
    pub data_dir: PathBuf,
    /// Session storage directory (`<data_dir>/sessions`).
    pub sessions_dir: PathBuf,
    /// Idle TTL before an unused agent process is recycled.
    pub idle_ttl: Duration,
    /// Minimum delay between streaming message edits.
    pub stream_edit_throttle: Duration,
    /// Outbound formatting mode.
    pub parse_mode: ParseModeSetting,
}

impl BotConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Loads configuration from the given variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let telegram_bot_token = non_empty(vars, "TELEGRAM_BOT_TOKEN")
            .ok_or_else(|| TelegramError::Config("missing TELEGRAM_BOT_TOKEN".to_string()))?;

        let allowed_user_ids = parse_allowed_user_ids(vars.get("TELEGRAM_ALLOWED_USER_IDS"))?;

        let agent_bin =
            non_empty(vars, "AGENT_BIN").unwrap_or_else(|| DEFAULT_AGENT_BIN.to_string());

        let agent_cwd = match non_empty(vars, "AGENT_CWD") {
            Some(raw) => PathBuf::from(shellexpand::tilde(&raw).into_owned()),
            None => std::env::current_dir()?,
        };

        let data_dir = match non_empty(vars, "TELEGRAM_DATA_DIR") {
            Some(raw) => PathBuf::from(shellexpand::tilde(&raw).into_owned()),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_DATA_DIR_NAME),
        };
        let sessions_dir = data_dir.join("sessions");

        let idle_ttl = Duration::from_millis(parse_millis(
            vars.get("TELEGRAM_IDLE_TTL_MS"),
            DEFAULT_IDLE_TTL_MS,
            "TELEGRAM_IDLE_TTL_MS",
        )?);
        let stream_edit_throttle = Duration::from_millis(parse_millis(
            vars.get("TELEGRAM_STREAM_EDIT_THROTTLE_MS"),
            DEFAULT_STREAM_EDIT_THROTTLE_MS,
            "TELEGRAM_STREAM_EDIT_THROTTLE_MS",
        )?);

        let parse_mode = match non_empty(vars, "TELEGRAM_PARSE_MODE") {
            Some(raw) => raw.parse()?,
            None => ParseModeSetting::default(),
        };

        Ok(Self {
            telegram_bot_token,
            allowed_user_ids,
            agent_bin,
            agent_cwd,
            data_dir,
            sessions_dir,
            idle_ttl,
            stream_edit_throttle,
            parse_mode,
        })
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_allowed_user_ids(value: Option<&String>) -> Result<HashSet<u64>> {
    let raw = value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| TelegramError::Config("missing TELEGRAM_ALLOWED_USER_IDS".to_string()))?;

    let mut ids = HashSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let id: u64 = part.parse().map_err(|_| {
            TelegramError::Config(
                "invalid TELEGRAM_ALLOWED_USER_IDS: expected comma-separated positive integers"
                    .to_string(),
            )
        })?;
        if id == 0 {
            return Err(TelegramError::Config(
                "invalid TELEGRAM_ALLOWED_USER_IDS: user ids must be positive".to_string(),
            ));
        }
        ids.insert(id);
    }

    if ids.is_empty() {
        return Err(TelegramError::Config(
            "invalid TELEGRAM_ALLOWED_USER_IDS: expected comma-separated positive integers"
                .to_string(),
        ));
    }
    Ok(ids)
}

fn parse_millis(value: Option<&String>, fallback: u64, key: &str) -> Result<u64> {
    let Some(raw) = value.map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(fallback);
    };

    raw.parse().map_err(|_| {
        TelegramError::Config(format!(
            "invalid {key}: expected a non-negative integer, got '{raw}'"
        ))
    })
}
