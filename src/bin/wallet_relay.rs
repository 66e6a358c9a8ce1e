use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use wallet_relay::DISCORD_GATEWAY_URL;
use wallet_relay::config::{AppConfig, CONFIG_PATH};
use wallet_relay::discord::{self, DiscordClient, GatewayOptions};
use wallet_relay::engine::{Relay, RelayOptions};
use wallet_relay::feed::{self, FeedOptions};
use wallet_relay::state::WatchList;

#[derive(Parser)]
#[command(
    name = "wallet-relay",
    about = "Relay Solana log activity for watched wallets into a Discord channel"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Extra wallet to watch from startup (repeatable)
    #[arg(long = "wallet")]
    wallets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;
    info!("Loaded config from {}", args.config.display());

    let watch_list = WatchList::with_wallets(
        config
            .settings
            .initial_wallets
            .iter()
            .chain(args.wallets.iter()),
    );
    let settings = &config.settings;
    info!(
        "Starting wallet-relay — guild={} channel={} feed={} commitment={} watching={}",
        config.discord.guild_id,
        config.discord.channel_id,
        config.feed.url,
        config.feed.commitment,
        watch_list.len(),
    );

    let (chat_tx, chat_rx) = mpsc::channel(settings.queue_capacity);
    let (feed_tx, feed_rx) = mpsc::channel(settings.queue_capacity);
    let (out_tx, out_rx) = mpsc::channel(settings.queue_capacity);

    tokio::spawn(discord::run_gateway(
        GatewayOptions {
            url: DISCORD_GATEWAY_URL.to_string(),
            token: config.discord.token.clone(),
            reconnect_base: settings.reconnect_base(),
            reconnect_max: settings.reconnect_max(),
        },
        chat_tx,
    ));

    tokio::spawn(feed::run(
        FeedOptions {
            url: config.feed.url.clone(),
            reconnect_base: settings.reconnect_base(),
            reconnect_max: settings.reconnect_max(),
            degraded_after: settings.degraded_after,
            stable_after: settings.reconnect_stable(),
        },
        feed_tx,
        out_rx,
    ));

    let relay = Relay::new(
        Arc::new(DiscordClient::new(config.discord.token.clone())),
        watch_list,
        RelayOptions {
            guild_id: config.discord.guild_id.clone(),
            channel_id: config.discord.channel_id.clone(),
            commitment: config.feed.commitment.clone(),
            subscribe_on_add: settings.subscribe_on_add,
            notify_capacity: settings.queue_capacity,
        },
        out_tx,
    );

    info!("Relay running. Press Ctrl+C to stop.");
    relay.run(chat_rx, feed_rx).await;

    Ok(())
}
