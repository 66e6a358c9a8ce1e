use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::commands::{self, Command, ERROR_REPLY, FeedAction};
use crate::discord::ChatApi;
use crate::error::RelayError;
use crate::feed::SubscriptionBook;
use crate::matcher;
use crate::notifier::{self, Delivery, Notifier};
use crate::reporter;
use crate::state::WatchList;
use crate::types::{
    ChatEvent, FeedEvent, FeedMessage, FeedState, Interaction, OutboundFrame, RpcRequest,
};

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub guild_id: String,
    pub channel_id: String,
    pub commitment: String,
    pub subscribe_on_add: bool,
    /// Matches that may wait for delivery before new ones are dropped.
    pub notify_capacity: usize,
}

/// Owns the watch list and routes chat and feed events to the command
/// handler, subscriber, matcher and notifier.
///
/// Every watch-list mutation happens here, one event at a time. Command
/// replies go out on their own tasks and notifications on a single delivery
/// task, so a slow Discord call never holds up the dispatcher.
pub struct Relay<C: ChatApi> {
    chat: Arc<C>,
    watch_list: WatchList,
    subscriptions: SubscriptionBook,
    deliveries: mpsc::Sender<Delivery>,
    delivery_task: JoinHandle<()>,
    feed_out: mpsc::Sender<OutboundFrame>,
    feed_state: FeedState,
    /// Connection the feed task last reported; `None` while it is down.
    feed_generation: Option<u64>,
    guild_id: String,
    subscribe_on_add: bool,
}

impl<C: ChatApi> Relay<C> {
    pub fn new(
        chat: Arc<C>,
        watch_list: WatchList,
        opts: RelayOptions,
        feed_out: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        let (deliveries, queue) = mpsc::channel(opts.notify_capacity.max(1));
        let delivery_task = tokio::spawn(notifier::run(
            Arc::clone(&chat),
            Notifier::new(opts.channel_id),
            queue,
        ));
        Self {
            chat,
            watch_list,
            subscriptions: SubscriptionBook::new(opts.commitment),
            deliveries,
            delivery_task,
            feed_out,
            feed_state: FeedState::Disconnected,
            feed_generation: None,
            guild_id: opts.guild_id,
            subscribe_on_add: opts.subscribe_on_add,
        }
    }

    pub fn watch_list(&self) -> &WatchList {
        &self.watch_list
    }

    pub fn feed_state(&self) -> FeedState {
        self.feed_state
    }

    /// Process events until Ctrl+C.
    pub async fn run(
        self,
        chat_events: mpsc::Receiver<ChatEvent>,
        feed_events: mpsc::Receiver<FeedEvent>,
    ) {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        };
        self.run_until(chat_events, feed_events, shutdown).await;
    }

    /// Process events until `shutdown` resolves or both queues close.
    pub async fn run_until<F: Future<Output = ()>>(
        mut self,
        mut chat_events: mpsc::Receiver<ChatEvent>,
        mut feed_events: mpsc::Receiver<FeedEvent>,
        shutdown: F,
    ) {
        tokio::pin!(shutdown);
        let mut chat_open = true;
        let mut feed_open = true;

        while chat_open || feed_open {
            tokio::select! {
                _ = &mut shutdown => break,
                event = chat_events.recv(), if chat_open => match event {
                    Some(event) => {
                        self.handle_chat_event(event).await;
                    }
                    None => {
                        warn!("Discord gateway task stopped; commands are unavailable");
                        chat_open = false;
                    }
                },
                event = feed_events.recv(), if feed_open => match event {
                    Some(event) => self.handle_feed_event(event).await,
                    None => {
                        warn!("Log feed task stopped");
                        feed_open = false;
                    }
                },
            }
        }

        info!("Relay stopped with {} watched wallet(s)", self.watch_list.len());
        self.shutdown().await;
    }

    /// Close the notification queue and wait for queued matches to go out.
    pub async fn shutdown(self) {
        let Relay {
            deliveries,
            delivery_task,
            ..
        } = self;
        drop(deliveries);
        if let Err(e) = delivery_task.await {
            error!("Notification task failed: {e}");
        }
    }

    // ── chat side ──────────────────────────────────────────────────

    /// Returns the reply task for command invocations.
    pub async fn handle_chat_event(&mut self, event: ChatEvent) -> Option<JoinHandle<()>> {
        match event {
            ChatEvent::Ready {
                application_id,
                user,
            } => {
                info!("Bot logged in as {user}");
                self.register_commands(&application_id).await;
                None
            }
            ChatEvent::Command(interaction) => Some(self.handle_command(interaction)),
        }
    }

    async fn register_commands(&self, application_id: &str) {
        let definitions = commands::command_definitions();
        match self
            .chat
            .register_commands(application_id, &self.guild_id, &definitions)
            .await
        {
            Ok(()) => info!("Successfully registered application commands."),
            Err(e) => error!("{}", RelayError::CommandRegistration(e)),
        }
    }

    /// Apply a command now and deliver its ack + follow-up on a separate task.
    pub fn handle_command(&mut self, interaction: Interaction) -> JoinHandle<()> {
        let parsed = interaction
            .data
            .as_ref()
            .ok_or_else(|| RelayError::InvalidCommand("interaction without data".into()))
            .and_then(Command::from_interaction);

        let reply = match parsed {
            Ok(command) => {
                let outcome = commands::apply(&mut self.watch_list, &command);
                info!("{}", outcome.reply);
                self.apply_feed_action(outcome.feed_action);
                outcome.reply
            }
            Err(e) => {
                warn!("Error handling interaction: {e}");
                ERROR_REPLY.to_string()
            }
        };

        let chat = Arc::clone(&self.chat);
        tokio::spawn(async move {
            if let Err(e) = chat.defer_reply(&interaction).await {
                error!("Error deferring reply: {}", RelayError::ReplyDelivery(e));
                return;
            }
            if let Err(e) = chat.follow_up(&interaction, &reply).await {
                error!("Error sending follow-up: {}", RelayError::ReplyDelivery(e));
            }
        })
    }

    fn apply_feed_action(&mut self, action: FeedAction) {
        match action {
            FeedAction::None => {}
            FeedAction::Subscribe(wallet) => {
                if !self.subscribe_on_add {
                    return;
                }
                if !self.feed_state.is_live() {
                    debug!("Feed not connected; {wallet} will be subscribed on connect");
                    return;
                }
                let req = self.subscriptions.subscribe(&wallet);
                if self.send_to_feed(&req) {
                    info!("Subscribed to wallet: {wallet}");
                }
            }
            FeedAction::Unsubscribe(wallet) => {
                if let Some(req) = self.subscriptions.unsubscribe(&wallet) {
                    if self.feed_state.is_live() && self.send_to_feed(&req) {
                        info!("Unsubscribed from wallet: {wallet}");
                    }
                }
            }
        }
    }

    // ── feed side ──────────────────────────────────────────────────

    pub async fn handle_feed_event(&mut self, event: FeedEvent) {
        let previous = self.feed_state;
        self.feed_state = previous.on_event(&event);

        match event {
            FeedEvent::Connecting { attempt } => {
                debug!("Connecting to log feed (attempt {})", attempt + 1);
            }
            FeedEvent::Connected { generation } => {
                self.feed_generation = Some(generation);
                self.subscribe_all();
            }
            FeedEvent::Message(raw) => {
                self.handle_feed_message(&raw).await;
            }
            FeedEvent::Disconnected { reason } => {
                self.feed_generation = None;
                self.subscriptions.clear();
                warn!("{}", RelayError::FeedTransport(reason));
            }
            FeedEvent::Degraded { failures } => {
                if previous != FeedState::Degraded {
                    error!("Log feed degraded after {failures} consecutive failures; still retrying");
                }
            }
        }
    }

    /// One `logsSubscribe` per watched wallet on a fresh connection.
    fn subscribe_all(&mut self) {
        self.subscriptions.clear();
        let wallets = self.watch_list.list();
        let requests = self.subscriptions.subscribe_all(&self.watch_list);
        info!("Connected to log feed, subscribing {} wallet(s)", requests.len());
        for (wallet, req) in wallets.iter().zip(&requests) {
            if self.send_to_feed(req) {
                info!("Subscribed to wallet: {wallet}");
            }
        }
    }

    /// Classify one feed frame and queue matches for delivery. Returns how
    /// many wallets matched.
    pub async fn handle_feed_message(&mut self, raw: &str) -> usize {
        let message = match matcher::classify(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Discarding feed frame: {e}");
                return 0;
            }
        };

        match message {
            FeedMessage::Logs(lines) => {
                let matched = matcher::matching_wallets(&lines, &self.watch_list);
                let lines: Arc<[String]> = lines.into();
                for wallet in &matched {
                    self.queue_delivery(wallet, &lines);
                }
                matched.len()
            }
            FeedMessage::SubscriptionAck { id, subscription } => {
                match self.subscriptions.confirm(id, subscription) {
                    Some(wallet) => info!("Subscription {subscription} confirmed for {wallet}"),
                    None => debug!("Ack for unknown request {id}"),
                }
                0
            }
            FeedMessage::RpcError { id, message } => {
                match id.and_then(|id| self.subscriptions.reject(id)) {
                    Some(wallet) => warn!("Feed rejected subscription for {wallet}: {message}"),
                    None => warn!("Feed error: {message}"),
                }
                0
            }
            FeedMessage::Other => {
                debug!("Ignoring feed frame: {raw}");
                0
            }
        }
    }

    fn queue_delivery(&self, wallet: &str, lines: &Arc<[String]>) {
        let delivery = Delivery {
            wallet: wallet.to_string(),
            lines: Arc::clone(lines),
        };
        match self.deliveries.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(d)) => {
                warn!("Notification queue full; dropped match for {}", d.wallet);
                reporter::report_match(&reporter::match_event(&d.wallet, &d.lines, false));
            }
            Err(TrySendError::Closed(d)) => {
                warn!("Notification task gone; dropped match for {}", d.wallet);
                reporter::report_match(&reporter::match_event(&d.wallet, &d.lines, false));
            }
        }
    }

    /// Queue a request for the connection the feed task last reported.
    fn send_to_feed(&self, req: &RpcRequest) -> bool {
        let Some(generation) = self.feed_generation else {
            debug!("Feed down; not sending {} request {}", req.method, req.id);
            return false;
        };
        let text = match serde_json::to_string(req) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} request: {e}", req.method);
                return false;
            }
        };
        match self.feed_out.try_send(OutboundFrame { generation, text }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Feed outbound queue full; dropped {} request {}", req.method, req.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Feed task gone; dropped {} request {}", req.method, req.id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingChat};
    use serde_json::{Value, json};
    use std::time::{Duration, Instant};

    const GUILD: &str = "guild-1";
    const CHANNEL: &str = "chan-1";

    fn relay(
        chat: RecordingChat,
        wallets: &[&str],
        subscribe_on_add: bool,
    ) -> (Relay<RecordingChat>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(64);
        let relay = Relay::new(
            Arc::new(chat),
            WatchList::with_wallets(wallets.iter().copied()),
            RelayOptions {
                guild_id: GUILD.into(),
                channel_id: CHANNEL.into(),
                commitment: "confirmed".into(),
                subscribe_on_add,
                notify_capacity: 64,
            },
            tx,
        );
        (relay, rx)
    }

    fn drain_frames(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<Value> {
        drain_frames(rx)
            .into_iter()
            .map(|f| serde_json::from_str(&f.text).unwrap())
            .collect()
    }

    fn interaction(id: &str, name: &str, wallet: Option<&str>) -> Interaction {
        let options = match wallet {
            Some(w) => json!([{ "name": "wallet", "type": 3, "value": w }]),
            None => json!([]),
        };
        serde_json::from_value(json!({
            "id": id,
            "application_id": "app-1",
            "type": 2,
            "token": format!("tok-{id}"),
            "guild_id": GUILD,
            "data": { "name": name, "options": options }
        }))
        .expect("valid test Interaction JSON")
    }

    // ── matching + notification ────────────────────────────────────

    #[tokio::test]
    async fn relays_single_match() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &["Wallet123"], true);
        let n = relay
            .handle_feed_message(r#"{"result":{"logs":["Transfer from Wallet123 to X"]}}"#)
            .await;
        assert_eq!(n, 1);
        relay.shutdown().await;
        assert_eq!(
            chat.sends(),
            vec![(
                CHANNEL.to_string(),
                "New transaction for wallet Wallet123:\nTransfer from Wallet123 to X".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn one_notification_per_matching_wallet_with_all_lines() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &["A1", "B2", "C3"], true);
        let raw = json!({ "result": { "logs": ["A1 -> B2", "fee paid", "A1 again"] } }).to_string();
        assert_eq!(relay.handle_feed_message(&raw).await, 2);
        relay.shutdown().await;
        let sends = chat.sends();
        assert_eq!(sends.len(), 2);
        assert!(sends[0].1.starts_with("New transaction for wallet A1:"));
        assert!(sends[1].1.starts_with("New transaction for wallet B2:"));
        for (_, content) in &sends {
            assert!(content.ends_with("A1 -> B2\nfee paid\nA1 again"));
        }
    }

    #[tokio::test]
    async fn non_log_frames_trigger_nothing() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &["Wallet123"], true);
        assert_eq!(relay.handle_feed_message(r#"{"result":"ok"}"#).await, 0);
        assert_eq!(relay.handle_feed_message("Wallet123 <- not json").await, 0);
        assert_eq!(
            relay
                .handle_feed_message(r#"{"jsonrpc":"2.0","result":5,"id":1}"#)
                .await,
            0
        );
        relay.shutdown().await;
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_watch_list_never_notifies() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &[], true);
        let raw = r#"{"result":{"logs":["Transfer from Wallet123 to X"]}}"#;
        assert_eq!(relay.handle_feed_message(raw).await, 0);
        relay.shutdown().await;
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_channel_skips_notification() {
        let chat = RecordingChat {
            missing_channel: true,
            ..Default::default()
        };
        let (mut relay, _rx) = relay(chat.clone(), &["Wallet123"], true);
        let raw = r#"{"result":{"logs":["Wallet123"]}}"#;
        assert_eq!(relay.handle_feed_message(raw).await, 1);
        assert_eq!(relay.handle_feed_message(raw).await, 1);
        relay.shutdown().await;
        assert!(chat.sends().is_empty());
        // not cached while unresolved
        let lookups = chat
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::ChannelLookup { .. }))
            .count();
        assert_eq!(lookups, 2);
    }

    #[tokio::test]
    async fn channel_lookup_is_cached() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &["Wallet123"], true);
        let raw = r#"{"result":{"logs":["Wallet123"]}}"#;
        relay.handle_feed_message(raw).await;
        relay.handle_feed_message(raw).await;
        relay.shutdown().await;
        let lookups = chat
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::ChannelLookup { .. }))
            .count();
        assert_eq!(lookups, 1);
        assert_eq!(chat.sends().len(), 2);
    }

    #[tokio::test]
    async fn slow_notifications_do_not_hold_up_commands() {
        let chat = RecordingChat {
            send_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let wallets = ["W1", "W2", "W3", "W4", "W5"];
        let (mut relay, _rx) = relay(chat.clone(), &wallets, true);
        let raw = json!({ "result": { "logs": ["W1 W2 W3 W4 W5"] } }).to_string();

        let started = Instant::now();
        assert_eq!(relay.handle_feed_message(&raw).await, 5);
        relay
            .handle_command(interaction("1", "list_wallets", None))
            .await
            .unwrap();
        // five sends take a full second; the reply must not wait for them
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(
            chat.follow_ups(),
            vec!["Currently monitored wallets: W1, W2, W3, W4, W5"]
        );
        assert!(chat.sends().len() < wallets.len());

        relay.shutdown().await;
        let sends = chat.sends();
        assert_eq!(sends.len(), wallets.len());
        for (wallet, (_, content)) in wallets.iter().zip(&sends) {
            assert!(content.starts_with(&format!("New transaction for wallet {wallet}:")));
        }
    }

    // ── subscriptions ──────────────────────────────────────────────

    #[tokio::test]
    async fn connect_with_empty_list_sends_no_subscriptions() {
        let (mut relay, mut rx) = relay(RecordingChat::default(), &[], true);
        relay.handle_feed_event(FeedEvent::Connected { generation: 1 }).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(relay.feed_state(), FeedState::Subscribed);
    }

    #[tokio::test]
    async fn connect_subscribes_each_wallet_once() {
        let (mut relay, mut rx) = relay(RecordingChat::default(), &["a", "b"], true);
        relay.handle_feed_event(FeedEvent::Connected { generation: 1 }).await;
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["method"], "logsSubscribe");
        assert_eq!(frames[0]["params"][0]["mentions"], json!(["a"]));
        assert_eq!(frames[1]["params"][0]["mentions"], json!(["b"]));
        assert_eq!(frames[1]["params"][1]["commitment"], "confirmed");
        assert_ne!(frames[0]["id"], frames[1]["id"]);
    }

    #[tokio::test]
    async fn reconnect_reissues_subscriptions() {
        let (mut relay, mut rx) = relay(RecordingChat::default(), &["a"], true);
        relay.handle_feed_event(FeedEvent::Connected { generation: 1 }).await;
        relay
            .handle_feed_event(FeedEvent::Disconnected {
                reason: "reset".into(),
            })
            .await;
        assert_eq!(relay.feed_state(), FeedState::Disconnected);
        relay.handle_feed_event(FeedEvent::Connected { generation: 2 }).await;
        let frames = drain_frames(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].generation, 1);
        assert_eq!(frames[1].generation, 2);
        let frames: Vec<Value> = frames
            .iter()
            .map(|f| serde_json::from_str(&f.text).unwrap())
            .collect();
        assert_ne!(frames[0]["id"], frames[1]["id"]);
    }

    #[tokio::test]
    async fn add_while_live_subscribes_immediately() {
        let chat = RecordingChat::default();
        let (mut relay, mut rx) = relay(chat, &[], true);
        relay.handle_feed_event(FeedEvent::Connected { generation: 1 }).await;
        relay
            .handle_command(interaction("1", "add_wallet", Some("Wallet123")))
            .await
            .unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["params"][0]["mentions"], json!(["Wallet123"]));
    }

    #[tokio::test]
    async fn add_while_down_waits_for_connect() {
        let (mut relay, mut rx) = relay(RecordingChat::default(), &[], true);
        relay
            .handle_command(interaction("1", "add_wallet", Some("Wallet123")))
            .await
            .unwrap();
        assert!(drain(&mut rx).is_empty());
        relay.handle_feed_event(FeedEvent::Connected { generation: 1 }).await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn add_without_late_subscription() {
        let (mut relay, mut rx) = relay(RecordingChat::default(), &[], false);
        relay.handle_feed_event(FeedEvent::Connected { generation: 1 }).await;
        relay
            .handle_command(interaction("1", "add_wallet", Some("Wallet123")))
            .await
            .unwrap();
        assert!(drain(&mut rx).is_empty());
        assert!(relay.watch_list().contains("Wallet123"));
    }

    #[tokio::test]
    async fn remove_after_ack_unsubscribes() {
        let (mut relay, mut rx) = relay(RecordingChat::default(), &["a"], true);
        relay.handle_feed_event(FeedEvent::Connected { generation: 1 }).await;
        let sub = drain(&mut rx);
        let id = sub[0]["id"].as_u64().unwrap();
        relay
            .handle_feed_event(FeedEvent::Message(
                json!({ "jsonrpc": "2.0", "result": 777, "id": id }).to_string(),
            ))
            .await;
        relay
            .handle_command(interaction("2", "remove_wallet", Some("a")))
            .await
            .unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["method"], "logsUnsubscribe");
        assert_eq!(frames[0]["params"], json!([777]));
    }

    #[tokio::test]
    async fn add_before_disconnect_is_processed_stays_on_old_connection() {
        // The feed task has already reconnected but its Disconnected event is
        // still queued, so the dispatcher thinks connection 1 is live.
        let (mut relay, mut rx) = relay(RecordingChat::default(), &[], true);
        relay.handle_feed_event(FeedEvent::Connected { generation: 1 }).await;
        relay
            .handle_command(interaction("1", "add_wallet", Some("W")))
            .await
            .unwrap();
        relay
            .handle_feed_event(FeedEvent::Disconnected {
                reason: "reset".into(),
            })
            .await;
        relay
            .handle_feed_event(FeedEvent::Connecting { attempt: 0 })
            .await;
        relay.handle_feed_event(FeedEvent::Connected { generation: 2 }).await;

        let frames = drain_frames(&mut rx);
        let stale: Vec<&OutboundFrame> = frames.iter().filter(|f| f.generation == 1).collect();
        let live: Vec<&OutboundFrame> = frames.iter().filter(|f| f.generation == 2).collect();
        assert_eq!(stale.len(), 1);
        assert_eq!(live.len(), 1);
        let req: Value = serde_json::from_str(&live[0].text).unwrap();
        assert_eq!(req["params"][0]["mentions"], json!(["W"]));
    }

    #[tokio::test]
    async fn degraded_state_reported() {
        let (mut relay, _rx) = relay(RecordingChat::default(), &[], true);
        relay
            .handle_feed_event(FeedEvent::Disconnected {
                reason: "refused".into(),
            })
            .await;
        relay
            .handle_feed_event(FeedEvent::Degraded { failures: 5 })
            .await;
        assert_eq!(relay.feed_state(), FeedState::Degraded);
        relay.handle_feed_event(FeedEvent::Connected { generation: 1 }).await;
        assert_eq!(relay.feed_state(), FeedState::Subscribed);
    }

    // ── commands ───────────────────────────────────────────────────

    #[tokio::test]
    async fn command_defers_then_follows_up() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &[], true);
        relay
            .handle_command(interaction("1", "add_wallet", Some("Wallet123")))
            .await
            .unwrap();
        assert_eq!(
            chat.calls(),
            vec![
                Call::Defer {
                    interaction_id: "1".into()
                },
                Call::FollowUp {
                    interaction_id: "1".into(),
                    content: "Wallet Wallet123 added to monitoring.".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn remove_unknown_wallet_reply() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &["Wallet123"], true);
        relay
            .handle_command(interaction("1", "remove_wallet", Some("WalletXYZ")))
            .await
            .unwrap();
        assert_eq!(
            chat.follow_ups(),
            vec!["Wallet WalletXYZ is not being monitored."]
        );
        assert_eq!(relay.watch_list().list(), vec!["Wallet123"]);
    }

    #[tokio::test]
    async fn list_reply_reflects_mutations() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &[], true);
        relay
            .handle_command(interaction("1", "list_wallets", None))
            .await
            .unwrap();
        relay
            .handle_command(interaction("2", "add_wallet", Some("a")))
            .await
            .unwrap();
        relay
            .handle_command(interaction("3", "add_wallet", Some("b")))
            .await
            .unwrap();
        relay
            .handle_command(interaction("4", "list_wallets", None))
            .await
            .unwrap();
        let replies = chat.follow_ups();
        assert_eq!(replies[0], "No wallets are being monitored.");
        assert_eq!(replies[3], "Currently monitored wallets: a, b");
    }

    #[tokio::test]
    async fn defer_failure_still_applies_command() {
        let chat = RecordingChat {
            fail_defer: true,
            ..Default::default()
        };
        let (mut relay, _rx) = relay(chat.clone(), &[], true);
        relay
            .handle_command(interaction("1", "add_wallet", Some("Wallet123")))
            .await
            .unwrap();
        assert!(relay.watch_list().contains("Wallet123"));
        assert!(chat.follow_ups().is_empty());
    }

    #[tokio::test]
    async fn follow_up_failure_is_not_fatal() {
        let chat = RecordingChat {
            fail_follow_up: true,
            ..Default::default()
        };
        let (mut relay, _rx) = relay(chat.clone(), &["Wallet123"], true);
        relay
            .handle_command(interaction("1", "remove_wallet", Some("Wallet123")))
            .await
            .unwrap();
        assert!(relay.watch_list().is_empty());
        assert_eq!(chat.follow_ups().len(), 1);
    }

    #[tokio::test]
    async fn invalid_command_gets_error_reply() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &[], true);
        relay
            .handle_command(interaction("1", "add_wallet", None))
            .await
            .unwrap();
        relay
            .handle_command(interaction("2", "rename_wallet", Some("x")))
            .await
            .unwrap();
        assert_eq!(chat.follow_ups(), vec![ERROR_REPLY, ERROR_REPLY]);
        assert!(relay.watch_list().is_empty());
    }

    #[tokio::test]
    async fn ready_registers_guild_commands() {
        let chat = RecordingChat::default();
        let (mut relay, _rx) = relay(chat.clone(), &[], true);
        let handle = relay
            .handle_chat_event(ChatEvent::Ready {
                application_id: "app-1".into(),
                user: "relay".into(),
            })
            .await;
        assert!(handle.is_none());
        assert_eq!(
            chat.calls(),
            vec![Call::Register {
                application_id: "app-1".into(),
                guild_id: GUILD.into(),
                count: 3
            }]
        );
    }

    #[tokio::test]
    async fn registration_failure_keeps_running() {
        let chat = RecordingChat {
            fail_register: true,
            ..Default::default()
        };
        let (mut relay, _rx) = relay(chat.clone(), &["Wallet123"], true);
        relay
            .handle_chat_event(ChatEvent::Ready {
                application_id: "app-1".into(),
                user: "relay".into(),
            })
            .await;
        let raw = r#"{"result":{"logs":["Wallet123"]}}"#;
        assert_eq!(relay.handle_feed_message(raw).await, 1);
        relay.shutdown().await;
        assert_eq!(chat.sends().len(), 1);
    }

    // ── run loop ───────────────────────────────────────────────────

    #[tokio::test]
    async fn run_processes_queues_until_closed() {
        let chat = RecordingChat::default();
        let (relay, mut out_rx) = relay(chat.clone(), &["Wallet123"], true);
        let (chat_tx, chat_rx) = mpsc::channel(8);
        let (feed_tx, feed_rx) = mpsc::channel(8);

        feed_tx.send(FeedEvent::Connected { generation: 1 }).await.unwrap();
        feed_tx
            .send(FeedEvent::Message(
                r#"{"result":{"logs":["Transfer from Wallet123 to X"]}}"#.into(),
            ))
            .await
            .unwrap();
        drop(chat_tx);
        drop(feed_tx);

        relay
            .run_until(chat_rx, feed_rx, std::future::pending())
            .await;

        assert_eq!(drain(&mut out_rx).len(), 1);
        assert_eq!(chat.sends().len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (relay, _rx) = relay(RecordingChat::default(), &[], true);
        let (_chat_tx, chat_rx) = mpsc::channel::<ChatEvent>(8);
        let (_feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(8);
        relay.run_until(chat_rx, feed_rx, async {}).await;
    }
}
