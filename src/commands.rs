use serde_json::Value;

use crate::error::RelayError;
use crate::state::WatchList;
use crate::types::{CommandDefinition, CommandOptionDefinition, InteractionData};

pub const ADD_WALLET: &str = "add_wallet";
pub const REMOVE_WALLET: &str = "remove_wallet";
pub const LIST_WALLETS: &str = "list_wallets";

/// Name of the string option carried by add/remove.
const WALLET_OPTION: &str = "wallet";

/// Reply sent when an invocation can't be mapped to a command.
pub const ERROR_REPLY: &str = "An error occurred while processing your command.";

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddWallet(String),
    RemoveWallet(String),
    ListWallets,
}

impl Command {
    pub fn from_interaction(data: &InteractionData) -> Result<Self, RelayError> {
        match data.name.as_str() {
            ADD_WALLET => Ok(Command::AddWallet(wallet_option(data)?)),
            REMOVE_WALLET => Ok(Command::RemoveWallet(wallet_option(data)?)),
            LIST_WALLETS => Ok(Command::ListWallets),
            other => Err(RelayError::InvalidCommand(format!("unknown command {other}"))),
        }
    }
}

fn wallet_option(data: &InteractionData) -> Result<String, RelayError> {
    let wallet = data
        .options
        .iter()
        .find(|o| o.name == WALLET_OPTION)
        .and_then(|o| o.value.as_ref())
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if wallet.is_empty() {
        return Err(RelayError::InvalidCommand(format!(
            "{} requires a non-empty `{WALLET_OPTION}` option",
            data.name
        )));
    }
    Ok(wallet.to_string())
}

/// Side effect on the feed a command asks the dispatcher to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedAction {
    None,
    Subscribe(String),
    Unsubscribe(String),
}

/// Result of applying a command to the watch list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply: String,
    pub feed_action: FeedAction,
}

impl CommandOutcome {
    fn reply_only(reply: String) -> Self {
        Self {
            reply,
            feed_action: FeedAction::None,
        }
    }
}

/// Apply `command` to the watch list and produce the follow-up reply.
pub fn apply(watch_list: &mut WatchList, command: &Command) -> CommandOutcome {
    match command {
        Command::AddWallet(wallet) => {
            if watch_list.add(wallet) {
                CommandOutcome {
                    reply: format!("Wallet {wallet} added to monitoring."),
                    feed_action: FeedAction::Subscribe(wallet.clone()),
                }
            } else {
                CommandOutcome::reply_only(format!("Wallet {wallet} is already being monitored."))
            }
        }
        Command::RemoveWallet(wallet) => {
            if watch_list.remove(wallet) {
                CommandOutcome {
                    reply: format!("Wallet {wallet} removed from monitoring."),
                    feed_action: FeedAction::Unsubscribe(wallet.clone()),
                }
            } else {
                CommandOutcome::reply_only(format!("Wallet {wallet} is not being monitored."))
            }
        }
        Command::ListWallets => {
            if watch_list.is_empty() {
                CommandOutcome::reply_only("No wallets are being monitored.".to_string())
            } else {
                CommandOutcome::reply_only(format!(
                    "Currently monitored wallets: {}",
                    watch_list.list().join(", ")
                ))
            }
        }
    }
}

/// Registration body for the three guild commands.
pub fn command_definitions() -> Vec<CommandDefinition> {
    let wallet_arg = CommandOptionDefinition {
        kind: 3,
        name: WALLET_OPTION,
        description: "Wallet address",
        required: true,
    };
    vec![
        CommandDefinition {
            name: ADD_WALLET,
            description: "Add a wallet to monitor",
            kind: 1,
            options: vec![wallet_arg.clone()],
        },
        CommandDefinition {
            name: REMOVE_WALLET,
            description: "Remove a wallet from monitoring",
            kind: 1,
            options: vec![wallet_arg],
        },
        CommandDefinition {
            name: LIST_WALLETS,
            description: "List all monitored wallets",
            kind: 1,
            options: vec![],
        },
    ]
}
