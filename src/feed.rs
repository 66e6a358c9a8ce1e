use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::state::WatchList;
use crate::types::{FeedEvent, OutboundFrame, RpcRequest};

pub const SUBSCRIBE_METHOD: &str = "logsSubscribe";
pub const UNSUBSCRIBE_METHOD: &str = "logsUnsubscribe";

/// Exponential reconnect delay: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Delay for the current attempt, then advance.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        let delay = self.base.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Issues subscribe/unsubscribe requests and remembers which subscription id
/// the feed assigned to each wallet on the current connection.
#[derive(Debug)]
pub struct SubscriptionBook {
    commitment: String,
    next_id: u64,
    /// Request id → wallet, waiting for the feed's ack.
    pending: HashMap<u64, String>,
    /// Wallet → subscription id confirmed by the feed.
    active: HashMap<String, u64>,
}

impl SubscriptionBook {
    pub fn new(commitment: impl Into<String>) -> Self {
        Self {
            commitment: commitment.into(),
            next_id: 1,
            pending: HashMap::new(),
            active: HashMap::new(),
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Build a `logsSubscribe` request for one wallet and track it as pending.
    pub fn subscribe(&mut self, wallet: &str) -> RpcRequest {
        let id = self.take_id();
        self.pending.insert(id, wallet.to_string());
        RpcRequest {
            jsonrpc: "2.0",
            id,
            method: SUBSCRIBE_METHOD,
            params: json!([
                { "mentions": [wallet] },
                { "commitment": self.commitment },
            ]),
        }
    }

    /// One subscribe request per wallet in the snapshot, in list order.
    pub fn subscribe_all(&mut self, watch_list: &WatchList) -> Vec<RpcRequest> {
        watch_list.iter().map(|w| self.subscribe(w)).collect()
    }

    /// Build a `logsUnsubscribe` request if the wallet has a confirmed subscription.
    ///
    /// A still-pending request is forgotten so its ack won't be recorded.
    pub fn unsubscribe(&mut self, wallet: &str) -> Option<RpcRequest> {
        self.pending.retain(|_, w| w != wallet);
        let subscription = self.active.remove(wallet)?;
        let id = self.take_id();
        Some(RpcRequest {
            jsonrpc: "2.0",
            id,
            method: UNSUBSCRIBE_METHOD,
            params: json!([subscription]),
        })
    }

    /// Record the feed's ack. Returns the wallet the request was for.
    pub fn confirm(&mut self, id: u64, subscription: u64) -> Option<String> {
        let wallet = self.pending.remove(&id)?;
        self.active.insert(wallet.clone(), subscription);
        Some(wallet)
    }

    /// Drop a pending request the feed rejected.
    pub fn reject(&mut self, id: u64) -> Option<String> {
        self.pending.remove(&id)
    }

    #[cfg(test)]
    pub fn subscription_for(&self, wallet: &str) -> Option<u64> {
        self.active.get(wallet).copied()
    }

    /// Forget everything tied to the previous connection.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.active.clear();
    }
}

/// Settings for the feed transport task.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub url: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Consecutive failed attempts before reporting `Degraded`.
    pub degraded_after: u32,
    /// A session must stay up this long before the backoff starts over.
    pub stable_after: Duration,
}

/// Run the feed connection until the dispatcher goes away.
///
/// Every successful connect bumps a generation number reported in
/// [`FeedEvent::Connected`]. Text frames are forwarded as
/// [`FeedEvent::Message`]; frames queued on `outbound` are written to the
/// socket only if they carry the current generation.
pub async fn run(
    opts: FeedOptions,
    events: mpsc::Sender<FeedEvent>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
) {
    let mut backoff = Backoff::new(opts.reconnect_base, opts.reconnect_max);
    let mut generation = 0u64;

    loop {
        let attempt = backoff.failures();
        if events.send(FeedEvent::Connecting { attempt }).await.is_err() {
            return;
        }

        let reason = match connect_async(opts.url.as_str()).await {
            Ok((ws, _)) => {
                generation += 1;
                info!("Connected to log feed at {} (connection {generation})", opts.url);
                if events.send(FeedEvent::Connected { generation }).await.is_err() {
                    return;
                }
                let opened = Instant::now();
                let outcome = session(ws, generation, &events, &mut outbound).await;
                if opened.elapsed() >= opts.stable_after {
                    backoff.reset();
                }
                match outcome {
                    Ok(Some(reason)) => reason,
                    Ok(None) => return,
                    Err(e) => format!("{e}"),
                }
            }
            Err(e) => format!("connect failed: {e}"),
        };

        if events
            .send(FeedEvent::Disconnected {
                reason: reason.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        let delay = backoff.next_delay();
        let failures = backoff.failures();
        if failures >= opts.degraded_after
            && events.send(FeedEvent::Degraded { failures }).await.is_err()
        {
            return;
        }
        warn!("Log feed down ({reason}), reconnecting in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Pump one connection. `Ok(Some(reason))` means the socket ended and we
/// should reconnect; `Ok(None)` means the dispatcher is gone.
async fn session(
    ws: WsStream,
    generation: u64,
    events: &mpsc::Sender<FeedEvent>,
    outbound: &mut mpsc::Receiver<OutboundFrame>,
) -> Result<Option<String>> {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(None);
                };
                if frame.generation != generation {
                    debug!("Dropping frame queued for connection {}: {}", frame.generation, frame.text);
                    continue;
                }
                debug!("Feed <- {}", frame.text);
                write.send(Message::Text(frame.text.into())).await?;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if events.send(FeedEvent::Message(text.to_string())).await.is_err() {
                        return Ok(None);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Some(format!("closed by server: {frame:?}")));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Ok(Some(format!("websocket error: {e}"))),
                None => return Ok(Some("stream ended".to_string())),
            }
        }
    }
}
