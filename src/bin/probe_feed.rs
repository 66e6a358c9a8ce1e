//! Probe: Solana log feed
//!
//! Connects to the configured websocket endpoint and:
//! - Sends one `logsSubscribe` for the given wallet
//! - Classifies every frame the way the relay does (logs / ack / error / other)
//! - Reports whether the wallet would have matched each log notification
//! - Listens for a fixed window, then prints a summary

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use wallet_relay::DEFAULT_FEED_URL;
use wallet_relay::config::FEED_URL_VAR;
use wallet_relay::feed::SubscriptionBook;
use wallet_relay::matcher::{classify, matching_wallets};
use wallet_relay::state::WatchList;
use wallet_relay::types::FeedMessage;

#[derive(Parser)]
#[command(about = "Subscribe to one wallet on the log feed and print what arrives")]
struct Cli {
    /// Wallet (or program) address to subscribe to
    wallet: String,

    /// Websocket endpoint (defaults to $SOLANA_WS_URL, then public mainnet)
    #[arg(long)]
    url: Option<String>,

    /// Commitment level for the subscription
    #[arg(long, default_value = "confirmed")]
    commitment: String,

    /// How long to listen, in seconds
    #[arg(long, default_value_t = 30)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let url = cli
        .url
        .or_else(|| std::env::var(FEED_URL_VAR).ok())
        .unwrap_or_else(|| DEFAULT_FEED_URL.to_string());

    println!("=== Probe: Solana log feed ===");
    println!("URL:    {url}");
    println!("Wallet: {}", cli.wallet);
    println!();

    println!("--- Connecting ---");
    let (ws_stream, response) = connect_async(url.as_str()).await?;
    println!("Connected! Response status: {}", response.status());
    println!();

    let (mut write, mut read) = ws_stream.split();

    let watch = WatchList::with_wallets([cli.wallet.as_str()]);
    let mut book = SubscriptionBook::new(cli.commitment);
    let request = serde_json::to_string(&book.subscribe(&cli.wallet))?;
    println!("--- Sending subscription ---");
    println!("  {request}");
    write.send(Message::Text(request.into())).await?;
    println!();

    println!("--- Listening for {} seconds ---", cli.seconds);
    let start = Instant::now();
    let timeout = Duration::from_secs(cli.seconds);
    let mut msg_count = 0u64;
    let mut kinds: HashMap<&'static str, u64> = HashMap::new();
    let mut matched = 0u64;

    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(Duration::from_secs(1), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                msg_count += 1;
                let elapsed = start.elapsed().as_secs_f64();
                let kind = match classify(text.as_str()) {
                    Ok(FeedMessage::Logs(lines)) => {
                        let hit = !matching_wallets(&lines, &watch).is_empty();
                        if hit {
                            matched += 1;
                        }
                        println!(
                            "[{elapsed:.1}s] #{msg_count} logs ({} lines, match={hit})",
                            lines.len()
                        );
                        for line in lines.iter().take(5) {
                            println!("    {line}");
                        }
                        "logs"
                    }
                    Ok(FeedMessage::SubscriptionAck { id, subscription }) => {
                        if book.confirm(id, subscription).is_some() {
                            println!("[{elapsed:.1}s] subscription {subscription} confirmed");
                        }
                        "ack"
                    }
                    Ok(FeedMessage::RpcError { message, .. }) => {
                        println!("[{elapsed:.1}s] RPC error: {message}");
                        "error"
                    }
                    Ok(FeedMessage::Other) => {
                        println!("[{elapsed:.1}s] #{msg_count} other: {}", text.as_str());
                        "other"
                    }
                    Err(e) => {
                        println!("[{elapsed:.1}s] #{msg_count} malformed: {e}");
                        "malformed"
                    }
                };
                *kinds.entry(kind).or_default() += 1;
            }
            Ok(Some(Ok(Message::Close(frame)))) => {
                println!("Close: {frame:?}");
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                println!("WebSocket error: {e}");
                break;
            }
            Ok(None) => {
                println!("WebSocket stream ended");
                break;
            }
            Err(_) => continue,
        }
    }

    println!();
    println!("--- Summary ---");
    println!("Total messages received: {msg_count}");
    println!("Duration: {:.1}s", start.elapsed().as_secs_f64());
    println!("By kind: {kinds:?}");
    println!("Log notifications matching {}: {matched}", cli.wallet);
    println!();
    println!("=== Probe Complete ===");
    Ok(())
}
