//! Dispatcher wiring for the bridge.

use std::sync::Arc;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::BotCommandScope;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use courier_runtime::{AgentPool, PoolConfig, ProcessRuntimeFactory, RuntimeFactory};
use courier_storage::{DetailsStore, SessionStore};

use crate::config::BotConfig;
use crate::error::Result;
use crate::handlers::{handle_command, handle_message, route_for_message, AppState, Command};
use crate::outbound::Outbound;

/// The Courier Telegram bridge.
pub struct CourierBot {
    state: Arc<AppState>,
}

impl CourierBot {
    /// Builds the bridge: bot handle, stores, agent pool.
    ///
    /// Must be called from within a tokio runtime (the pool starts its
    /// sweep timer immediately).
    pub fn new(config: BotConfig) -> Self {
        let bot = Bot::new(config.telegram_bot_token.clone());
        let outbound = Outbound::new(bot, config.parse_mode.to_parse_mode());

        let sessions = Arc::new(SessionStore::new(&config.sessions_dir));
        let details = DetailsStore::new(&config.sessions_dir);
        let factory: Arc<dyn RuntimeFactory> = Arc::new(ProcessRuntimeFactory::new(
            config.agent_bin.as_str(),
            &config.agent_cwd,
        ));
        let pool = AgentPool::new(
            PoolConfig::new().with_idle_ttl(config.idle_ttl),
            factory,
            sessions,
        );

        Self {
            state: Arc::new(AppState {
                config,
                pool,
                details,
                outbound,
            }),
        }
    }

    /// Returns the bot's username (also validates the token).
    pub async fn get_me(&self) -> Result<String> {
        let me = self.state.outbound.bot().get_me().await?;
        Ok(me.username().to_string())
    }

    /// Runs long polling until shutdown, then disposes the pool.
    pub async fn run(self) -> Result<()> {
        self.register_commands().await;

        let bot = self.state.outbound.bot().clone();
        let state_for_commands = Arc::clone(&self.state);
        let state_for_unknown = Arc::clone(&self.state);
        let state_for_messages = Arc::clone(&self.state);

        let handler = dptree::entry()
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                        let state = Arc::clone(&state_for_commands);
                        async move { handle_command(bot, msg, cmd, state).await }
                    }),
            )
            .branch(
                // Commands that did not parse (start with / but are not
                // in the menu).
                Update::filter_message()
                    .filter(|msg: Message| {
                        msg.text().map(|t| t.starts_with('/')).unwrap_or(false)
                    })
                    .endpoint(move |bot: Bot, msg: Message| {
                        let state = Arc::clone(&state_for_unknown);
                        async move {
                            let allowed = msg
                                .from
                                .as_ref()
                                .map(|user| state.config.allowed_user_ids.contains(&user.id.0))
                                .unwrap_or(false);
                            if !allowed || route_for_message(&msg).is_none() {
                                return Ok(());
                            }

                            if let Some(text) = msg.text() {
                                let command =
                                    text.split_whitespace().next().unwrap_or(text);
                                bot.send_message(
                                    msg.chat.id,
                                    format!(
                                        "Unknown command: {command}\n\nUse /help to see available commands."
                                    ),
                                )
                                .await?;
                            }
                            Ok(())
                        }
                    }),
            )
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| {
                        msg.text().map(|t| !t.starts_with('/')).unwrap_or(false)
                    })
                    .endpoint(move |bot: Bot, msg: Message| {
                        let state = Arc::clone(&state_for_messages);
                        async move { handle_message(bot, msg, state).await }
                    }),
            );

        info!("bridge is running");

        Dispatcher::builder(bot, handler)
            .default_handler(|update| async move {
                warn!(update = ?update, "unhandled update");
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("dispatcher stopped, disposing agent pool");
        self.state.pool.dispose().await;
        Ok(())
    }

    /// Registers the command menu for private chats and group chats.
    async fn register_commands(&self) {
        let commands = Command::bot_commands();
        for scope in [
            BotCommandScope::AllPrivateChats,
            BotCommandScope::AllGroupChats,
        ] {
            if let Err(err) = self
                .state
                .outbound
                .set_commands(commands.clone(), scope.clone())
                .await
            {
                warn!(error = %err, "failed to register bot commands");
            }
        }
    }
}
