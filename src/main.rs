use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use bantrat::channels::{ChannelManager, CliChannel, TelegramChannel};
use bantrat::config::BotConfig;
use bantrat::conversation::{ConversationEngine, spawn_idle_sweeper};
use bantrat::credentials::{CredentialStore, FileCredentialStore};
use bantrat::dispatcher::Dispatcher;
use bantrat::gateway::{BankrApi, HttpGateway};

/// Upper bound on how often idle conversations are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().context("Invalid configuration")?;

    eprintln!("👾 bantrat v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Bankr API: {}", config.bankr_base_url);
    eprintln!("   Keys file: {}", config.keys_path.display());

    // ── Credentials + API ───────────────────────────────────────────────
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(config.keys_path.clone()));

    let gateway = HttpGateway::new(config.bankr_base_url.clone(), config.http_timeout)
        .context("Failed to build Bankr HTTP client")?;
    let api = BankrApi::new(Arc::new(gateway));

    // ── Conversations ───────────────────────────────────────────────────
    let engine = Arc::new(ConversationEngine::new(
        credentials,
        api,
        config.session_idle_timeout,
    ));
    let sweeper = spawn_idle_sweeper(
        Arc::clone(&engine),
        SWEEP_INTERVAL.min(config.session_idle_timeout),
    );

    // ── Channels ────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();

    if let Some(token) = config.telegram_token.clone() {
        eprintln!("   Telegram: enabled (allowed: {})", config.allowed_users.join(", "));
        channels.add(Box::new(TelegramChannel::new(
            token,
            config.allowed_users.clone(),
        )));
    }

    if config.enable_cli {
        eprintln!("   CLI: enabled");
        channels.add(Box::new(CliChannel::new()));
    }

    eprintln!();

    let dispatcher = Dispatcher::new(channels, engine, config.session_idle_timeout);
    let result = dispatcher.run().await;

    sweeper.abort();
    result.context("Dispatcher stopped with an error")?;

    tracing::info!("bantrat stopped");
    Ok(())
}
