use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Discord ────────────────────────────────────────────────────────

/// Interaction type for an application (slash) command.
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;

/// An `INTERACTION_CREATE` payload, trimmed to the fields the relay reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub application_id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    /// Continuation token used for the deferred ack and the follow-up.
    pub token: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub data: Option<InteractionData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<InteractionOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Slash command registration body (`PUT .../guilds/{guild}/commands`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOptionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOptionDefinition {
    /// 3 = STRING
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Events the gateway task hands to the dispatcher.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Session established; carries the bot's application id.
    Ready { application_id: String, user: String },
    /// A slash command invocation.
    Command(Interaction),
}

// ── Solana log feed ────────────────────────────────────────────────

/// JSON-RPC 2.0 request sent to the log feed.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: Value,
}

/// Classified inbound feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Log notification with its lines, untouched.
    Logs(Vec<String>),
    /// `{id, result: <subscription id>}` response to a subscribe request.
    SubscriptionAck { id: u64, subscription: u64 },
    /// JSON-RPC error response.
    RpcError { id: Option<u64>, message: String },
    /// Anything else; ignored.
    Other,
}

/// Events the feed transport task hands to the dispatcher.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Connecting { attempt: u32 },
    /// A new socket is open. `generation` increases with every connection.
    Connected { generation: u64 },
    Message(String),
    Disconnected { reason: String },
    Degraded { failures: u32 },
}

/// Request text bound for the feed, tagged with the connection it was
/// written for. The transport drops frames from an older connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub generation: u64,
    pub text: String,
}

/// Lifecycle of the feed connection as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Disconnected,
    Connecting,
    Subscribed,
    Degraded,
}

impl FeedState {
    /// Next state after a transport event. Messages don't move the state.
    pub fn on_event(self, event: &FeedEvent) -> Self {
        match event {
            FeedEvent::Connecting { .. } if self == FeedState::Degraded => FeedState::Degraded,
            FeedEvent::Connecting { .. } => FeedState::Connecting,
            FeedEvent::Connected { .. } => FeedState::Subscribed,
            FeedEvent::Disconnected { .. } if self == FeedState::Degraded => FeedState::Degraded,
            FeedEvent::Disconnected { .. } => FeedState::Disconnected,
            FeedEvent::Degraded { .. } => FeedState::Degraded,
            FeedEvent::Message(_) => self,
        }
    }

    pub fn is_live(self) -> bool {
        self == FeedState::Subscribed
    }
}

// ── Reporting ──────────────────────────────────────────────────────

/// One relayed match, emitted as a JSON line on stdout.
#[derive(Debug, Clone, Serialize)]
pub struct MatchEvent {
    pub timestamp: String,
    pub wallet: String,
    pub logs: Vec<String>,
    pub delivered: bool,
}
