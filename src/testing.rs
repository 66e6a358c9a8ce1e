//! In-memory [`ChatApi`] used by the dispatcher and notifier tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};

use crate::discord::ChatApi;
use crate::types::{CommandDefinition, Interaction};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Register { application_id: String, guild_id: String, count: usize },
    Defer { interaction_id: String },
    FollowUp { interaction_id: String, content: String },
    ChannelLookup { channel_id: String },
    Send { channel_id: String, content: String },
}

/// Records every call; individual operations can be made to fail.
#[derive(Clone, Default)]
pub struct RecordingChat {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub missing_channel: bool,
    pub fail_defer: bool,
    pub fail_follow_up: bool,
    pub fail_register: bool,
    /// Each `send_message` takes this long, like a rate-limited channel.
    pub send_delay: Option<Duration>,
}

impl RecordingChat {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send {
                    channel_id,
                    content,
                } => Some((channel_id, content)),
                _ => None,
            })
            .collect()
    }

    pub fn follow_ups(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::FollowUp { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ChatApi for RecordingChat {
    async fn register_commands(
        &self,
        application_id: &str,
        guild_id: &str,
        commands: &[CommandDefinition],
    ) -> Result<()> {
        self.record(Call::Register {
            application_id: application_id.to_string(),
            guild_id: guild_id.to_string(),
            count: commands.len(),
        });
        if self.fail_register {
            bail!("HTTP 403 Forbidden: Missing Access");
        }
        Ok(())
    }

    async fn defer_reply(&self, interaction: &Interaction) -> Result<()> {
        self.record(Call::Defer {
            interaction_id: interaction.id.clone(),
        });
        if self.fail_defer {
            bail!("HTTP 404: Unknown interaction");
        }
        Ok(())
    }

    async fn follow_up(&self, interaction: &Interaction, content: &str) -> Result<()> {
        self.record(Call::FollowUp {
            interaction_id: interaction.id.clone(),
            content: content.to_string(),
        });
        if self.fail_follow_up {
            bail!("HTTP 404: Unknown webhook");
        }
        Ok(())
    }

    async fn channel_exists(&self, channel_id: &str) -> Result<bool> {
        self.record(Call::ChannelLookup {
            channel_id: channel_id.to_string(),
        });
        Ok(!self.missing_channel)
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Call::Send {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }
}
