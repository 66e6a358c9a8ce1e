pub mod commands;
pub mod config;
pub mod discord;
pub mod engine;
pub mod error;
pub mod feed;
pub mod matcher;
pub mod notifier;
pub mod reporter;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

/// Discord REST API base URL (v10).
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Discord gateway URL (v10, JSON encoding).
pub const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Public Solana mainnet websocket endpoint. Heavily rate limited; point
/// `feed.url` at a dedicated RPC provider for real use.
pub const DEFAULT_FEED_URL: &str = "wss://api.mainnet-beta.solana.com";
