//! Telegram bridge to an external agent process.
//!
//! This crate wires the agent pool to Telegram:
//! - long polling via teloxide's dispatcher
//! - allowlist gating (anyone else is ignored silently)
//! - private chats and supergroup forum topics, each mapped to an
//!   isolated conversation context
//! - streamed answers rendered as one throttled, edited message
//! - `/reset`, `/session`, and `/details` commands
//!
//! # Environment Variables
//!
//! Required:
//! - `TELEGRAM_BOT_TOKEN`: bot token from @BotFather
//! - `TELEGRAM_ALLOWED_USER_IDS`: comma-separated user ids
//!
//! Optional: `AGENT_BIN`, `AGENT_CWD`, `TELEGRAM_DATA_DIR`,
//! `TELEGRAM_IDLE_TTL_MS`, `TELEGRAM_STREAM_EDIT_THROTTLE_MS`,
//! `TELEGRAM_PARSE_MODE`, `TELEGRAM_ENV_FILE` (see `config`).

pub mod bot;
pub mod config;
pub mod error;
pub mod handlers;
pub mod outbound;
pub mod stream;

pub use bot::CourierBot;
pub use config::{BotConfig, ParseModeSetting};
pub use error::{Result, TelegramError};
pub use handlers::{AppState, Command};
pub use outbound::Outbound;
pub use stream::StreamRenderer;
