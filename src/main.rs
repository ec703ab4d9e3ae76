mod config;
mod lookup;
mod relay;
mod scheduler;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::lookup::UserLookup;
use crate::relay::router::{RelayRouter, RouterSettings};
use crate::relay::telegram::{DispatchContext, TelegramTransport};
use crate::relay::transport::Transport;
use crate::scheduler::auto_reply::{AutoReplySettings, AutoReplyThrottle};
use crate::scheduler::tasks::register_builtin_tasks;
use crate::scheduler::Scheduler;
use crate::store::IdentityStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,support_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Support group: {}", config.telegram.support_group_id);
    info!("  Database: {}", config.store.database_path.display());
    info!(
        "  Auto-reply: {}s delay, {}h cooldown",
        config.relay.auto_reply_delay_secs, config.relay.auto_reply_cooldown_hours
    );

    let store = IdentityStore::open(&config.store.database_path)?;

    let bot = Bot::new(&config.telegram.bot_token);
    let me = bot.get_me().await.context("Failed to fetch bot identity")?;
    info!("Running as @{} ({})", me.username(), me.id.0);

    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(
        bot.clone(),
        config.telegram.support_group_id,
    ));

    let throttle = AutoReplyThrottle::new(
        store.clone(),
        Arc::clone(&transport),
        AutoReplySettings {
            message: config.relay.auto_reply_message.clone(),
            delay: config.relay.auto_reply_delay(),
            cooldown: config.relay.auto_reply_cooldown(),
        },
    );

    let lookup = match config.lookup.clone() {
        Some(lookup_config) => Some(UserLookup::new(lookup_config)?),
        None => {
            info!("User lookup not configured, new topics get no info card");
            None
        }
    };

    let router = Arc::new(RelayRouter::new(
        RouterSettings::new(&config.relay, config.telegram.support_group_id, me.id.0),
        store.clone(),
        transport,
        throttle.clone(),
        lookup,
    ));

    let mut scheduler = Scheduler::new().await?;
    register_builtin_tasks(&mut scheduler, store, &config.store).await?;
    scheduler.start().await?;

    let context = DispatchContext {
        support_group_id: config.telegram.support_group_id,
        retract_command: config.relay.retract_command.clone(),
        bot_username: me.user.username.clone(),
    };
    relay::telegram::run(bot, router, context).await?;

    info!("Shutting down...");
    throttle.shutdown();
    if let Err(e) = scheduler.shutdown().await {
        warn!("Scheduler shutdown failed: {:#}", e);
    }

    Ok(())
}
