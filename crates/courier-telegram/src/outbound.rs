//! Outbound Telegram calls: send, edit, typing, topic management.
//!
//! Two failure modes are handled inline rather than surfaced:
//! - rate limiting: wait the server-reported delay and retry
//! - formatting rejections ("can't parse entities"): retry once without
//!   a parse mode, so an answer with broken markup still reaches the user

use std::time::Duration;

use teloxide::payloads::{
    EditMessageTextSetters, SendChatActionSetters, SendMessageSetters, SetMyCommandsSetters,
};
use teloxide::prelude::*;
use teloxide::types::{BotCommand, BotCommandScope, ChatAction, MessageId, ParseMode, ThreadId};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};

use crate::error::Result;

/// Upper bound on rate-limit retries for a single call.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// How an outbound request failed.
#[derive(Debug, PartialEq, Eq)]
enum SendFailure {
    /// Server asked us to wait before retrying.
    RetryAfter(Duration),
    /// The configured parse mode could not parse the text.
    UnparsableEntities,
    /// Edit carried the same content the message already has.
    NotModified,
    /// Anything else.
    Other,
}

fn classify(error: &RequestError) -> SendFailure {
    match error {
        RequestError::RetryAfter(seconds) => SendFailure::RetryAfter(seconds.duration()),
        RequestError::Api(ApiError::CantParseEntities(_)) => SendFailure::UnparsableEntities,
        RequestError::Api(ApiError::MessageNotModified) => SendFailure::NotModified,
        RequestError::Api(ApiError::Unknown(message))
            if message.contains("can't parse entities") =>
        {
            SendFailure::UnparsableEntities
        }
        _ => SendFailure::Other,
    }
}

/// Outbound half of the bridge: a bot handle plus the configured parse
/// mode.
#[derive(Clone)]
pub struct Outbound {
    bot: Bot,
    parse_mode: Option<ParseMode>,
}

impl Outbound {
    /// Creates the outbound helper.
    pub fn new(bot: Bot, parse_mode: Option<ParseMode>) -> Self {
        Self { bot, parse_mode }
    }

    /// Returns the underlying bot handle.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Sends a message, optionally into a forum topic.
    pub async fn send_text(
        &self,
        chat_id: ChatId,
        thread_id: Option<ThreadId>,
        text: &str,
    ) -> Result<MessageId> {
        let mut parse_mode = self.parse_mode;
        let mut rate_limit_retries = 0;

        loop {
            let mut request = self.bot.send_message(chat_id, text);
            if let Some(mode) = parse_mode {
                request = request.parse_mode(mode);
            }
            if let Some(thread_id) = thread_id {
                request = request.message_thread_id(thread_id);
            }

            match request.await {
                Ok(message) => return Ok(message.id),
                Err(error) => match classify(&error) {
                    SendFailure::RetryAfter(delay)
                        if rate_limit_retries < MAX_RATE_LIMIT_RETRIES =>
                    {
                        rate_limit_retries += 1;
                        warn!(
                            chat_id = chat_id.0,
                            delay_ms = delay.as_millis() as u64,
                            "send rate limited, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    SendFailure::UnparsableEntities if parse_mode.is_some() => {
                        debug!(chat_id = chat_id.0, "parse mode rejected, sending plain");
                        parse_mode = None;
                    }
                    _ => return Err(error.into()),
                },
            }
        }
    }

    /// Edits a previously sent message in place.
    ///
    /// Editing to identical content is treated as success.
    pub async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        let mut parse_mode = self.parse_mode;
        let mut rate_limit_retries = 0;

        loop {
            let mut request = self.bot.edit_message_text(chat_id, message_id, text);
            if let Some(mode) = parse_mode {
                request = request.parse_mode(mode);
            }

            match request.await {
                Ok(_) => return Ok(()),
                Err(error) => match classify(&error) {
                    SendFailure::NotModified => return Ok(()),
                    SendFailure::RetryAfter(delay)
                        if rate_limit_retries < MAX_RATE_LIMIT_RETRIES =>
                    {
                        rate_limit_retries += 1;
                        warn!(
                            chat_id = chat_id.0,
                            delay_ms = delay.as_millis() as u64,
                            "edit rate limited, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    SendFailure::UnparsableEntities if parse_mode.is_some() => {
                        debug!(chat_id = chat_id.0, "parse mode rejected, editing plain");
                        parse_mode = None;
                    }
                    _ => return Err(error.into()),
                },
            }
        }
    }

    /// Refreshes the typing indicator.
    pub async fn typing(&self, chat_id: ChatId, thread_id: Option<ThreadId>) -> Result<()> {
        let mut request = self.bot.send_chat_action(chat_id, ChatAction::Typing);
        if let Some(thread_id) = thread_id {
            request = request.message_thread_id(thread_id);
        }
        request.await?;
        Ok(())
    }

    /// Deletes a forum topic.
    pub async fn delete_forum_topic(&self, chat_id: ChatId, thread_id: ThreadId) -> Result<()> {
        self.bot.delete_forum_topic(chat_id, thread_id).await?;
        Ok(())
    }

    /// Registers the bot's command menu for one scope.
    pub async fn set_commands(
        &self,
        commands: Vec<BotCommand>,
        scope: BotCommandScope,
    ) -> Result<()> {
        self.bot.set_my_commands(commands).scope(scope).await?;
        Ok(())
    }
}
