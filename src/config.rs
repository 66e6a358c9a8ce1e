use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Env var that overrides `discord.token`.
pub const TOKEN_VAR: &str = "DISCORD_TOKEN";

/// Env var that overrides `feed.url`.
pub const FEED_URL_VAR: &str = "SOLANA_WS_URL";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// Bot credentials and routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token. May be left empty and supplied via `DISCORD_TOKEN`.
    #[serde(default)]
    pub token: String,
    /// Guild the slash commands are registered in.
    pub guild_id: String,
    /// Channel that receives match notifications.
    pub channel_id: String,
}

/// Solana log feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    /// `processed`, `confirmed` or `finalized`.
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

fn default_feed_url() -> String {
    crate::DEFAULT_FEED_URL.to_string()
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            commitment: default_commitment(),
        }
    }
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Subscribe a wallet on the live feed as soon as it is added.
    #[serde(default = "default_subscribe_on_add")]
    pub subscribe_on_add: bool,
    /// First reconnect delay in milliseconds; doubles per failed attempt.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Upper bound on the reconnect delay in seconds.
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
    /// A feed session that lasts this many seconds resets the backoff.
    #[serde(default = "default_reconnect_stable_secs")]
    pub reconnect_stable_secs: u64,
    /// Consecutive failed attempts before the feed is reported degraded.
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
    /// Capacity of each inbound event queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Wallets watched from startup.
    #[serde(default)]
    pub initial_wallets: Vec<String>,
}

fn default_subscribe_on_add() -> bool {
    true
}

fn default_reconnect_base_ms() -> u64 {
    500
}

fn default_reconnect_max_secs() -> u64 {
    60
}

fn default_reconnect_stable_secs() -> u64 {
    30
}

fn default_degraded_after() -> u32 {
    5
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            subscribe_on_add: default_subscribe_on_add(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_secs: default_reconnect_max_secs(),
            reconnect_stable_secs: default_reconnect_stable_secs(),
            degraded_after: default_degraded_after(),
            queue_capacity: default_queue_capacity(),
            initial_wallets: Vec::new(),
        }
    }
}

impl SettingsConfig {
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs)
    }

    pub fn reconnect_stable(&self) -> Duration {
        Duration::from_secs(self.reconnect_stable_secs)
    }
}

impl AppConfig {
    /// Load config from the given TOML file path, apply env overrides, validate.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config = Self::parse(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Override file values with non-empty environment values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(TOKEN_VAR).filter(|v| !v.trim().is_empty()) {
            self.discord.token = token;
        }
        if let Some(url) = lookup(FEED_URL_VAR).filter(|v| !v.trim().is_empty()) {
            self.feed.url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.discord.token.trim().is_empty() {
            bail!("no bot token: set discord.token or {TOKEN_VAR}");
        }
        if self.discord.guild_id.trim().is_empty() {
            bail!("discord.guild_id must be set");
        }
        if self.discord.channel_id.trim().is_empty() {
            bail!("discord.channel_id must be set");
        }
        let url = url::Url::parse(&self.feed.url)
            .with_context(|| format!("invalid feed url {}", self.feed.url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("feed url must be ws:// or wss://, got {}", url.scheme());
        }
        if !matches!(
            self.feed.commitment.as_str(),
            "processed" | "confirmed" | "finalized"
        ) {
            bail!("unknown commitment level {}", self.feed.commitment);
        }
        if self.settings.queue_capacity == 0 {
            bail!("settings.queue_capacity must be positive");
        }
        Ok(())
    }
}
