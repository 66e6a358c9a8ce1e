use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::discord::{ChatApi, MAX_MESSAGE_CHARS};
use crate::error::RelayError;
use crate::reporter;

/// Marker appended when a notification is cut to fit Discord's limit.
const TRUNCATION_MARKER: &str = "\n…";

/// Delivers match notifications to the configured output channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    channel_id: String,
    /// Set once the channel lookup has succeeded.
    resolved: bool,
}

impl Notifier {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            resolved: false,
        }
    }

    /// Resolve the channel (first call only) and post the notification.
    pub async fn notify<C: ChatApi>(
        &mut self,
        chat: &C,
        wallet: &str,
        lines: &[String],
    ) -> Result<(), RelayError> {
        if !self.resolved {
            let exists = chat
                .channel_exists(&self.channel_id)
                .await
                .map_err(RelayError::Notification)?;
            if !exists {
                return Err(RelayError::ChannelNotFound(self.channel_id.clone()));
            }
            self.resolved = true;
        }

        let content = format_notification(wallet, lines);
        chat.send_message(&self.channel_id, &content)
            .await
            .map_err(RelayError::Notification)
    }
}

/// One matched wallet waiting for its notification.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub wallet: String,
    pub lines: Arc<[String]>,
}

/// Deliver queued matches in arrival order until the queue closes.
///
/// Each delivery is reported on stdout once it has been attempted.
pub async fn run<C: ChatApi>(
    chat: Arc<C>,
    mut notifier: Notifier,
    mut queue: mpsc::Receiver<Delivery>,
) {
    while let Some(Delivery { wallet, lines }) = queue.recv().await {
        let delivered = match notifier.notify(chat.as_ref(), &wallet, &lines).await {
            Ok(()) => {
                info!("Relayed transaction for wallet {wallet}");
                true
            }
            Err(e) => {
                warn!("Notification for {wallet} not delivered: {e}");
                false
            }
        };
        reporter::report_match(&reporter::match_event(&wallet, &lines, delivered));
    }
}

/// `New transaction for wallet {wallet}:` followed by one log line per row,
/// cut to fit a single Discord message.
pub fn format_notification(wallet: &str, lines: &[String]) -> String {
    let content = format!("New transaction for wallet {wallet}:\n{}", lines.join("\n"));
    truncate_chars(content, MAX_MESSAGE_CHARS)
}

fn truncate_chars(content: String, max: usize) -> String {
    if content.chars().count() <= max {
        return content;
    }
    let keep = max - TRUNCATION_MARKER.chars().count();
    let mut out: String = content.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
