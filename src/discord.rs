//! Discord collaborator: REST calls over reqwest and a minimal gateway client
//! over tokio-tungstenite.
//!
//! Only what the relay needs is covered: login + heartbeat, `READY`,
//! `INTERACTION_CREATE`, guild command registration, deferred replies,
//! follow-ups, channel lookup and message send. Sessions are never resumed;
//! every reconnect identifies from scratch.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::feed::Backoff;
use crate::types::{ChatEvent, CommandDefinition, INTERACTION_APPLICATION_COMMAND, Interaction};

/// GUILDS | GUILD_MESSAGES
pub const INTENTS: u64 = (1 << 0) | (1 << 9);

/// Interaction callback type: deferred channel message with source.
const DEFERRED_CHANNEL_MESSAGE: u8 = 5;

/// Discord rejects message content above this many characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Maximum attempts for a rate-limited REST call.
const MAX_RETRIES: u32 = 3;

/// Fallback wait when a 429 carries no usable `retry_after`.
const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// The chat operations the relay depends on.
///
/// [`DiscordClient`] talks to Discord; tests substitute an in-memory recorder.
pub trait ChatApi: Send + Sync + 'static {
    /// Replace the guild-scoped command set.
    fn register_commands(
        &self,
        application_id: &str,
        guild_id: &str,
        commands: &[CommandDefinition],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Acknowledge an interaction now, reply later.
    fn defer_reply(&self, interaction: &Interaction) -> impl Future<Output = Result<()>> + Send;

    /// The substantive reply to a deferred interaction.
    fn follow_up(
        &self,
        interaction: &Interaction,
        content: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Whether the channel id resolves to a channel the bot can see.
    fn channel_exists(&self, channel_id: &str) -> impl Future<Output = Result<bool>> + Send;

    fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

// ── REST ───────────────────────────────────────────────────────────

/// Authenticated Discord REST client.
#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base(token, crate::DISCORD_API_BASE)
    }

    pub fn with_base(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(AUTHORIZATION, format!("Bot {}", self.token))
    }

    /// Send a request, waiting out 429 responses.
    async fn execute(&self, req: RequestBuilder, what: &str) -> Result<Response> {
        for attempt in 0..MAX_RETRIES {
            let attempt_req = req
                .try_clone()
                .with_context(|| format!("{what}: request body not cloneable"))?;
            let resp = attempt_req
                .send()
                .await
                .with_context(|| format!("{what}: request failed"))?;

            if resp.status() != StatusCode::TOO_MANY_REQUESTS || attempt + 1 == MAX_RETRIES {
                return Ok(resp);
            }

            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let delay = retry_after(&body).unwrap_or(BASE_BACKOFF * 2u32.pow(attempt));
            warn!(
                "{what}: rate limited (attempt {}/{}), retrying in {delay:?}",
                attempt + 1,
                MAX_RETRIES
            );
            tokio::time::sleep(delay).await;
        }
        bail!("{what}: retry exhausted")
    }
}

/// Parse `retry_after` (seconds, fractional) from a 429 body.
fn retry_after(body: &Value) -> Option<Duration> {
    body.get("retry_after")
        .and_then(Value::as_f64)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

async fn ensure_success(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!("{what}: HTTP {status}: {body}")
}

impl ChatApi for DiscordClient {
    async fn register_commands(
        &self,
        application_id: &str,
        guild_id: &str,
        commands: &[CommandDefinition],
    ) -> Result<()> {
        let url = self.url(&format!(
            "/applications/{application_id}/guilds/{guild_id}/commands"
        ));
        let req = self.authorized(self.http.put(url)).json(commands);
        let resp = self.execute(req, "register commands").await?;
        ensure_success(resp, "register commands").await?;
        Ok(())
    }

    async fn defer_reply(&self, interaction: &Interaction) -> Result<()> {
        let url = self.url(&format!(
            "/interactions/{}/{}/callback",
            interaction.id, interaction.token
        ));
        let req = self
            .http
            .post(url)
            .json(&json!({ "type": DEFERRED_CHANNEL_MESSAGE }));
        let resp = self.execute(req, "defer reply").await?;
        ensure_success(resp, "defer reply").await?;
        Ok(())
    }

    async fn follow_up(&self, interaction: &Interaction, content: &str) -> Result<()> {
        let url = self.url(&format!(
            "/webhooks/{}/{}",
            interaction.application_id, interaction.token
        ));
        let req = self.http.post(url).json(&json!({ "content": content }));
        let resp = self.execute(req, "follow-up").await?;
        ensure_success(resp, "follow-up").await?;
        Ok(())
    }

    async fn channel_exists(&self, channel_id: &str) -> Result<bool> {
        let url = self.url(&format!("/channels/{channel_id}"));
        let req = self.authorized(self.http.get(url));
        let resp = self.execute(req, "channel lookup").await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(resp, "channel lookup").await?;
        Ok(true)
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        let url = self.url(&format!("/channels/{channel_id}/messages"));
        let req = self
            .authorized(self.http.post(url))
            .json(&json!({ "content": content }));
        let resp = self.execute(req, "send message").await?;
        ensure_success(resp, "send message").await?;
        Ok(())
    }
}

// ── Gateway ────────────────────────────────────────────────────────

mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ready {
    user: ReadyUser,
    application: ReadyApplication,
}

#[derive(Debug, Deserialize)]
struct ReadyUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct ReadyApplication {
    id: String,
}

/// Settings for the gateway task.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub url: String,
    pub token: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

pub fn identify_payload(token: &str) -> Value {
    json!({
        "op": op::IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": env!("CARGO_PKG_NAME"),
                "device": env!("CARGO_PKG_NAME"),
            }
        }
    })
}

fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({ "op": op::HEARTBEAT, "d": seq })
}

/// Turn a dispatch (`op 0`) into a relay event, if it's one we care about.
fn parse_dispatch(kind: &str, data: Value) -> Result<Option<ChatEvent>> {
    match kind {
        "READY" => {
            let ready: Ready = serde_json::from_value(data).context("bad READY payload")?;
            Ok(Some(ChatEvent::Ready {
                application_id: ready.application.id,
                user: ready.user.username,
            }))
        }
        "INTERACTION_CREATE" => {
            let interaction: Interaction =
                serde_json::from_value(data).context("bad INTERACTION_CREATE payload")?;
            if interaction.kind == INTERACTION_APPLICATION_COMMAND {
                Ok(Some(ChatEvent::Command(interaction)))
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}

/// Close codes after which reconnecting cannot help (bad token, bad intents).
fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010 | 4011 | 4012 | 4013 | 4014)
}

enum SessionEnd {
    Reconnect(String),
    Stop,
}

/// Keep a gateway session alive until the dispatcher goes away or Discord
/// refuses the credentials.
pub async fn run_gateway(opts: GatewayOptions, events: mpsc::Sender<ChatEvent>) {
    let mut backoff = Backoff::new(opts.reconnect_base, opts.reconnect_max);

    loop {
        match gateway_session(&opts, &events, &mut backoff).await {
            Ok(SessionEnd::Stop) => return,
            Ok(SessionEnd::Reconnect(reason)) => info!("Gateway session ended: {reason}"),
            Err(e) => warn!("Gateway error: {e:#}"),
        }
        let delay = backoff.next_delay();
        info!("Reconnecting to Discord gateway in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}

async fn gateway_session(
    opts: &GatewayOptions,
    events: &mpsc::Sender<ChatEvent>,
    backoff: &mut Backoff,
) -> Result<SessionEnd> {
    let (ws, _) = connect_async(opts.url.as_str())
        .await
        .context("gateway connect failed")?;
    let (mut write, mut read) = ws.split();

    // First frame is always Hello.
    let hello = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                break serde_json::from_str::<GatewayPayload>(text.as_str())
                    .context("bad Hello frame")?;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(SessionEnd::Reconnect("closed before Hello".into())),
        }
    };
    if hello.op != op::HELLO {
        bail!("expected Hello, got op {}", hello.op);
    }
    let interval_ms = hello
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .context("Hello without heartbeat_interval")?;
    let period = Duration::from_millis(interval_ms);

    write
        .send(Message::Text(identify_payload(&opts.token).to_string().into()))
        .await?;

    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut seq: Option<u64> = None;
    let mut acked = true;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if !acked {
                    return Ok(SessionEnd::Reconnect("heartbeat not acknowledged".into()));
                }
                acked = false;
                write.send(Message::Text(heartbeat_payload(seq).to_string().into())).await?;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let payload: GatewayPayload = match serde_json::from_str(text.as_str()) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("Ignoring unparseable gateway frame: {e}");
                            continue;
                        }
                    };
                    if payload.s.is_some() {
                        seq = payload.s;
                    }
                    match payload.op {
                        op::DISPATCH => {
                            let kind = payload.t.unwrap_or_default();
                            match parse_dispatch(&kind, payload.d) {
                                Ok(Some(event)) => {
                                    if matches!(event, ChatEvent::Ready { .. }) {
                                        backoff.reset();
                                    }
                                    if events.send(event).await.is_err() {
                                        return Ok(SessionEnd::Stop);
                                    }
                                }
                                Ok(None) => debug!("Ignoring dispatch {kind}"),
                                Err(e) => warn!("{e:#}"),
                            }
                        }
                        op::HEARTBEAT => {
                            write.send(Message::Text(heartbeat_payload(seq).to_string().into())).await?;
                        }
                        op::HEARTBEAT_ACK => acked = true,
                        op::RECONNECT => {
                            return Ok(SessionEnd::Reconnect("server requested reconnect".into()));
                        }
                        op::INVALID_SESSION => {
                            return Ok(SessionEnd::Reconnect("invalid session".into()));
                        }
                        other => debug!("Ignoring gateway op {other}"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(0);
                    if is_fatal_close(code) {
                        error!("Discord closed the gateway with code {code}; check the bot token and intents");
                        return Ok(SessionEnd::Stop);
                    }
                    return Ok(SessionEnd::Reconnect(format!("closed with code {code}")));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(SessionEnd::Reconnect("stream ended".into())),
            }
        }
    }
}
