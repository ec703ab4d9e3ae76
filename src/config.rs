use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default = "default_store_config")]
    pub store: StoreConfig,
    pub lookup: Option<LookupConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Forum-enabled supergroup where every user gets a topic
    pub support_group_id: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    #[serde(default = "default_auto_reply_message")]
    pub auto_reply_message: String,
    #[serde(default = "default_auto_reply_delay_secs")]
    pub auto_reply_delay_secs: u64,
    #[serde(default = "default_auto_reply_cooldown_hours")]
    pub auto_reply_cooldown_hours: u32,
    #[serde(default = "default_relay_failure_notice")]
    pub relay_failure_notice: String,
    #[serde(default = "default_topic_failure_notice")]
    pub topic_failure_notice: String,
    #[serde(default = "default_retract_command")]
    pub retract_command: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            welcome_message: default_welcome_message(),
            auto_reply_message: default_auto_reply_message(),
            auto_reply_delay_secs: default_auto_reply_delay_secs(),
            auto_reply_cooldown_hours: default_auto_reply_cooldown_hours(),
            relay_failure_notice: default_relay_failure_notice(),
            topic_failure_notice: default_topic_failure_notice(),
            retract_command: default_retract_command(),
        }
    }
}

impl RelayConfig {
    pub fn auto_reply_delay(&self) -> Duration {
        Duration::from_secs(self.auto_reply_delay_secs)
    }

    pub fn auto_reply_cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.auto_reply_cooldown_hours))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    /// Mappings older than this are purged; `None` keeps them forever
    #[serde(default)]
    pub mapping_retention_days: Option<u32>,
    #[serde(default = "default_purge_cron")]
    pub purge_cron: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LookupConfig {
    pub url: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_lookup_timeout_secs")]
    pub timeout_secs: u64,
    /// Base used for profile links on the info card
    #[serde(default = "default_profile_base_url")]
    pub profile_base_url: String,
}

fn default_welcome_message() -> String {
    "👋 Hello! This is the support bot.\n\n\
     Write your question and we will answer as soon as possible."
        .to_string()
}

fn default_auto_reply_message() -> String {
    "Thanks for your message! A support agent will get back to you shortly.".to_string()
}

fn default_auto_reply_delay_secs() -> u64 {
    5
}

fn default_auto_reply_cooldown_hours() -> u32 {
    24
}

fn default_relay_failure_notice() -> String {
    "Could not deliver your message. Please try again later.".to_string()
}

fn default_topic_failure_notice() -> String {
    "Something went wrong. Please try again later.".to_string()
}

fn default_retract_command() -> String {
    "/del".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("support_bot.db")
}

fn default_purge_cron() -> String {
    "0 0 3 * * *".to_string()
}

fn default_store_config() -> StoreConfig {
    StoreConfig {
        database_path: default_db_path(),
        mapping_retention_days: None,
        purge_cron: default_purge_cron(),
    }
}

fn default_lookup_timeout_secs() -> u64 {
    5
}

fn default_profile_base_url() -> String {
    "https://calink.ru".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)?;

        if config.telegram.bot_token.is_empty() {
            if let Ok(token) = std::env::var("BOT_TOKEN") {
                config.telegram.bot_token = token;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("telegram.bot_token is not set (and BOT_TOKEN is empty)");
        }
        if self.telegram.support_group_id == 0 {
            bail!("telegram.support_group_id is not set");
        }
        if self.relay.retract_command.is_empty() || !self.relay.retract_command.starts_with('/') {
            bail!(
                "relay.retract_command must start with '/': {:?}",
                self.relay.retract_command
            );
        }
        Ok(())
    }
}
