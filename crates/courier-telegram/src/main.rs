//! Courier Telegram bridge binary.
//!
//! Start the bridge with:
//! ```bash
//! TELEGRAM_BOT_TOKEN=xxx TELEGRAM_ALLOWED_USER_IDS=1001 cargo run -p courier-telegram
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use courier_telegram::{BotConfig, CourierBot};

/// Courier - talk to a local agent process from Telegram.
#[derive(Parser, Debug)]
#[command(name = "courier-telegram")]
#[command(about = "Telegram bridge to an external agent process")]
struct Args {
    /// Env file to load before reading configuration
    /// (default: $TELEGRAM_ENV_FILE, then .env)
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Verbose logging (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load the env file first; real environment variables win.
    let env_path = args
        .env_file
        .clone()
        .or_else(|| std::env::var("TELEGRAM_ENV_FILE").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(".env"));
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }

    let filter = match args.verbose {
        0 => "courier_telegram=info,courier_runtime=info,courier_storage=info,teloxide=warn",
        1 => "courier_telegram=debug,courier_runtime=debug,courier_storage=debug,teloxide=info",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BotConfig::from_env()?;
    tokio::fs::create_dir_all(&config.sessions_dir).await?;

    tracing::info!(
        agent_bin = %config.agent_bin,
        agent_cwd = %config.agent_cwd.display(),
        sessions_dir = %config.sessions_dir.display(),
        allowed_users = config.allowed_user_ids.len(),
        "starting courier"
    );

    let bot = CourierBot::new(config);

    match bot.get_me().await {
        Ok(username) => tracing::info!(username = %username, "bot initialized"),
        Err(err) => {
            tracing::error!(error = %err, "failed to reach the Telegram API");
            return Err(err.into());
        }
    }

    bot.run().await?;
    Ok(())
}
