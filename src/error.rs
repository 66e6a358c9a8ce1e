use thiserror::Error;

/// Failures the relay recovers from. None of these stop the process; the
/// dispatcher logs them and moves on to the next event.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Feed frame that is not valid JSON.
    #[error("malformed feed message: {0}")]
    MalformedFeedMessage(#[from] serde_json::Error),

    /// The configured output channel could not be resolved.
    #[error("channel {0} not found")]
    ChannelNotFound(String),

    /// Discord rejected a deferred acknowledgment or follow-up.
    #[error("reply delivery failed: {0}")]
    ReplyDelivery(#[source] anyhow::Error),

    /// Feed connection dropped or could not be established.
    #[error("feed transport: {0}")]
    FeedTransport(String),

    /// Discord rejected the guild command set at startup.
    #[error("command registration failed: {0}")]
    CommandRegistration(#[source] anyhow::Error),

    /// Interaction that does not map to a known command.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Message delivery to the output channel failed.
    #[error("notification delivery failed: {0}")]
    Notification(#[source] anyhow::Error),
}
