//! Command dispatcher: routes inbound messages to the engine or the API.
//!
//! Every user gets a lane: an ordered queue drained by its own task. A
//! user's turns run strictly one after another while other users proceed
//! concurrently. Lanes close after sitting idle and are reopened on the
//! next message.

pub mod command;
pub mod render;

pub use command::{Command, is_plausible_address};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::{ChannelManager, IncomingMessage, OutgoingResponse, StatusUpdate};
use crate::conversation::{ConversationEngine, Progress, ProgressSink};
use crate::error::{Error, StoreError};

/// Calls that skip the conversation engine and go straight to the API.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Portfolio,
    Fees,
    ClaimFees,
    Token(Option<String>),
}

struct Lane {
    tx: mpsc::UnboundedSender<IncomingMessage>,
    handle: JoinHandle<()>,
}

/// Per-message handling shared by every lane.
#[derive(Clone)]
struct Handler {
    channels: Arc<ChannelManager>,
    engine: Arc<ConversationEngine>,
}

pub struct Dispatcher {
    handler: Handler,
    lane_idle_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        channels: ChannelManager,
        engine: Arc<ConversationEngine>,
        lane_idle_timeout: Duration,
    ) -> Self {
        Self {
            handler: Handler {
                channels: Arc::new(channels),
                engine,
            },
            lane_idle_timeout,
        }
    }

    /// Run until Ctrl-C or until every channel stream ends.
    pub async fn run(self) -> Result<(), Error> {
        let channels = Arc::clone(&self.handler.channels);
        let mut message_stream = channels.start_all().await?;
        let mut lanes: HashMap<String, Lane> = HashMap::new();

        info!(channels = ?channels.names(), "bantrat ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            info!("All channel streams ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            self.enqueue(&mut lanes, message);
        }

        // Dropping the senders lets each lane finish what it has queued.
        let pending: Vec<JoinHandle<()>> = lanes.into_values().map(|lane| lane.handle).collect();
        for handle in pending {
            if let Err(e) = handle.await {
                warn!("Lane task failed: {e}");
            }
        }

        channels.shutdown_all().await?;
        Ok(())
    }

    /// Handle one message directly, outside any lane.
    pub async fn handle(&self, message: &IncomingMessage) -> Result<String, StoreError> {
        self.handler.handle(message).await
    }

    fn enqueue(&self, lanes: &mut HashMap<String, Lane>, message: IncomingMessage) {
        let message = match lanes.get(&message.user_id) {
            Some(lane) => match lane.tx.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        // The user's lane is missing or went idle: open a new one that
        // waits for the old one to finish draining.
        let user_id = message.user_id.clone();
        let previous = lanes.remove(&user_id).map(|lane| lane.handle);
        lanes.retain(|_, lane| !lane.handle.is_finished());

        let lane = self.spawn_lane(user_id.clone(), previous);
        if lane.tx.send(message).is_err() {
            warn!(user_id = %user_id, "New lane closed before first message");
        }
        lanes.insert(user_id, lane);
    }

    fn spawn_lane(&self, user_id: String, previous: Option<JoinHandle<()>>) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<IncomingMessage>();
        let handler = self.handler.clone();
        let idle = self.lane_idle_timeout;

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    warn!(user_id = %user_id, "Previous lane failed: {e}");
                }
            }
            debug!(user_id = %user_id, "Lane opened");

            loop {
                match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(message)) => handler.process(&message).await,
                    Ok(None) => break,
                    Err(_) => {
                        // Refuse new sends, then finish anything already queued.
                        rx.close();
                        while let Some(message) = rx.recv().await {
                            handler.process(&message).await;
                        }
                        break;
                    }
                }
            }

            debug!(user_id = %user_id, "Lane closed");
        });

        Lane { tx, handle }
    }
}

impl Handler {
    /// Handle a message and send the reply back on its channel.
    async fn process(&self, message: &IncomingMessage) {
        let text = match self.handle(message).await {
            Ok(text) => text,
            Err(e) => {
                error!(user_id = %message.user_id, "Error handling message: {e}");
                render::internal_error(&e)
            }
        };

        if let Err(e) = self
            .channels
            .respond(message, OutgoingResponse::text(text))
            .await
        {
            warn!(user_id = %message.user_id, channel = %message.channel, "Failed to send reply: {e}");
        }
    }

    async fn handle(&self, message: &IncomingMessage) -> Result<String, StoreError> {
        let user_id = message.user_id.as_str();

        // Content is never logged: it may be an API key.
        debug!(
            user_id = %user_id,
            channel = %message.channel,
            chars = message.content.len(),
            "Received message"
        );

        let reply = match Command::parse(&message.content) {
            Command::Start => self.engine.start(user_id).await?,
            Command::SetKey => self.engine.set_key(user_id).await,
            Command::Deploy => self.engine.deploy(user_id, false).await?,
            Command::Simulate => self.engine.deploy(user_id, true).await?,
            Command::Cancel => self.engine.cancel(user_id).await,
            Command::Help => return Ok(render::help()),
            Command::Portfolio => return self.lookup(message, Lookup::Portfolio).await,
            Command::Fees => return self.lookup(message, Lookup::Fees).await,
            Command::ClaimFees => return self.lookup(message, Lookup::ClaimFees).await,
            Command::Token(address) => return self.lookup(message, Lookup::Token(address)).await,
            Command::Unknown(name) => return Ok(render::unknown_command(&name)),
            Command::Text(text) => {
                let progress = ChannelProgress {
                    channels: &self.channels,
                    message,
                };
                self.engine.handle_text(user_id, &text, &progress).await?
            }
        };

        Ok(render::reply(&reply))
    }

    async fn lookup(&self, message: &IncomingMessage, lookup: Lookup) -> Result<String, StoreError> {
        let Some(api_key) = self.engine.credentials().get(&message.user_id).await? else {
            return Ok(render::missing_credential());
        };
        let api = self.engine.api();

        let (title, result) = match lookup {
            Lookup::Portfolio => {
                notice(&self.channels, message, "⏳ Fetching portfolio...").await;
                ("💼 *Portfolio*", api.portfolio(&api_key).await)
            }
            Lookup::Fees => {
                notice(&self.channels, message, "⏳ Fetching claimable fees...").await;
                ("💰 *Claimable Fees*", api.fees(&api_key).await)
            }
            Lookup::ClaimFees => {
                notice(&self.channels, message, "⏳ Claiming fees...").await;
                ("✅ *Fees Claimed!*", api.claim_fees(&api_key).await)
            }
            Lookup::Token(None) => return Ok(render::token_usage()),
            Lookup::Token(Some(address)) if !is_plausible_address(&address) => {
                return Ok(render::invalid_address());
            }
            Lookup::Token(Some(address)) => {
                let text = format!("⏳ Looking up `{}`", render::shorten(&address, 10));
                notice(&self.channels, message, &text).await;
                ("🔍 *Token Info*", api.token(&address, &api_key).await)
            }
        };

        Ok(match result {
            Ok(payload) => render::payload(title, &payload),
            Err(e) => {
                warn!(user_id = %message.user_id, "Lookup failed: {e}");
                render::gateway_error(&e)
            }
        })
    }
}

/// Show a progress notice, then a bare typing indicator while the call runs.
async fn notice(channels: &ChannelManager, message: &IncomingMessage, text: &str) {
    for status in [
        StatusUpdate::Status(text.to_string()),
        StatusUpdate::Thinking(String::new()),
    ] {
        if let Err(e) = channels.send_status(message, status).await {
            debug!(user_id = %message.user_id, "Status update dropped: {e}");
        }
    }
}

/// Forwards engine progress to the channel the turn came from.
struct ChannelProgress<'a> {
    channels: &'a ChannelManager,
    message: &'a IncomingMessage,
}

#[async_trait]
impl ProgressSink for ChannelProgress<'_> {
    async fn notify(&self, progress: Progress) {
        notice(self.channels, self.message, &render::progress(progress)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;
    use crate::channels::{Channel, MessageStream};
    use crate::credentials::{CredentialStore, MemoryCredentialStore};
    use crate::error::{ChannelError, GatewayError};
    use crate::gateway::{ApiRequest, BankrApi, Gateway, GatewayResult};

    const GOOD_KEY: &str = "bk_live_0123456789";

    /// Answers by request path; records every call.
    #[derive(Default)]
    struct PathGateway {
        replies: HashMap<String, GatewayResult>,
        calls: Mutex<Vec<ApiRequest>>,
    }

    impl PathGateway {
        fn with(mut self, path: &str, reply: GatewayResult) -> Self {
            self.replies.insert(path.to_string(), reply);
            self
        }

        fn paths(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|c| c.path.clone()).collect()
        }
    }

    #[async_trait]
    impl Gateway for PathGateway {
        async fn call(&self, request: ApiRequest, _api_key: &SecretString) -> GatewayResult {
            let reply = self
                .replies
                .get(&request.path)
                .cloned()
                .unwrap_or_else(|| Ok(json!({})));
            self.calls.lock().unwrap().push(request);
            reply
        }
    }

    type Log = Arc<Mutex<Vec<(String, String)>>>;

    /// Emits a fixed script of (user, text) messages, records what is sent.
    /// Statuses are logged as (kind, text).
    struct ScriptedChannel {
        script: Vec<(&'static str, &'static str)>,
        replies: Log,
        statuses: Log,
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        fn name(&self) -> &str {
            "test"
        }

        async fn start(&self) -> Result<MessageStream, ChannelError> {
            let msgs: Vec<IncomingMessage> = self
                .script
                .iter()
                .map(|(user, text)| IncomingMessage::new("test", user, text))
                .collect();
            Ok(Box::pin(stream::iter(msgs)))
        }

        async fn respond(
            &self,
            msg: &IncomingMessage,
            response: OutgoingResponse,
        ) -> Result<(), ChannelError> {
            self.replies
                .lock()
                .unwrap()
                .push((msg.user_id.clone(), response.content));
            Ok(())
        }

        async fn send_status(
            &self,
            status: StatusUpdate,
            _metadata: &serde_json::Value,
        ) -> Result<(), ChannelError> {
            let entry = match status {
                StatusUpdate::Status(text) => ("status".to_string(), text),
                StatusUpdate::Thinking(text) => ("thinking".to_string(), text),
            };
            self.statuses.lock().unwrap().push(entry);
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        store: Arc<MemoryCredentialStore>,
        gateway: Arc<PathGateway>,
        replies: Log,
        statuses: Log,
    }

    fn harness(gateway: PathGateway, script: Vec<(&'static str, &'static str)>) -> Harness {
        let gateway = Arc::new(gateway);
        let store = Arc::new(MemoryCredentialStore::new());
        let engine = Arc::new(ConversationEngine::new(
            store.clone(),
            BankrApi::new(gateway.clone()),
            Duration::from_secs(900),
        ));

        let replies: Log = Arc::default();
        let statuses: Log = Arc::default();
        let mut channels = ChannelManager::new();
        channels.add(Box::new(ScriptedChannel {
            script,
            replies: replies.clone(),
            statuses: statuses.clone(),
        }));

        Harness {
            dispatcher: Dispatcher::new(channels, engine, Duration::from_secs(60)),
            store,
            gateway,
            replies,
            statuses,
        }
    }

    fn replies_for(log: &Log, user: &str) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == user)
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn deploy_ok() -> GatewayResult {
        Ok(json!({
            "success": true,
            "simulated": false,
            "tokenAddress": "0xclaw",
            "poolId": "0xpool",
            "txHash": "0xtx",
            "chain": "base",
            "feeDistribution": {"creator": {"bps": 5700, "address": "0xcreator"}}
        }))
    }

    async fn say(h: &Harness, user: &str, text: &str) -> String {
        h.dispatcher
            .handle(&IncomingMessage::new("test", user, text))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn run_keeps_each_users_turns_in_order() {
        let h = harness(
            PathGateway::default().with("/token-launches/deploy", deploy_ok()),
            vec![
                ("alice", "/start"),
                ("bob", "/portfolio"),
                ("alice", GOOD_KEY),
                ("bob", "hello"),
                ("alice", "/deploy"),
                ("alice", "Claw"),
                ("alice", "skip"),
                ("alice", "skip"),
                ("alice", "skip"),
                ("alice", "confirm"),
            ],
        );
        let replies = h.replies.clone();
        let statuses = h.statuses.clone();

        h.dispatcher.run().await.unwrap();

        let alice = replies_for(&replies, "alice");
        assert_eq!(alice.len(), 8, "{alice:#?}");
        assert!(alice[0].contains("Welcome to bantrat"));
        assert!(alice[1].contains("API key saved"));
        assert!(alice[2].contains("Token Deploy"));
        assert!(alice[3].contains("Token symbol"));
        assert!(alice[4].contains("description"));
        assert!(alice[5].contains("Image URL"));
        assert!(alice[6].contains("Ready to deploy"));
        assert!(alice[7].contains("✅ Deployed *Claw*"));
        assert!(alice[7].contains("Creator: 57%"));

        let bob = replies_for(&replies, "bob");
        assert_eq!(bob.len(), 2);
        assert!(bob[0].contains("haven't set your Bankr API key"));
        assert!(bob[1].contains("/help"));

        let notices: Vec<String> = statuses.lock().unwrap().iter().map(|(_, t)| t.clone()).collect();
        assert!(notices.iter().any(|t| t.contains("Verifying")));
        assert!(notices.iter().any(|t| t.contains("Deploying")));
    }

    #[tokio::test]
    async fn lookups_require_a_key() {
        let h = harness(PathGateway::default(), vec![]);
        for cmd in ["/portfolio", "/fees", "/claimfees", "/token 0xabc"] {
            assert!(say(&h, "carol", cmd).await.contains("/setkey"), "{cmd}");
        }
        assert!(h.gateway.paths().is_empty());
    }

    #[tokio::test]
    async fn lookups_call_their_endpoints() {
        let h = harness(
            PathGateway::default()
                .with("/portfolio", Ok(json!({"eth": "1.5"})))
                .with("/token-launches/0xabc", Ok(json!({"name": "Claw"}))),
            vec![],
        );
        h.store
            .set("carol", &SecretString::from(GOOD_KEY))
            .await
            .unwrap();

        let portfolio = say(&h, "carol", "/portfolio").await;
        assert!(portfolio.starts_with("💼 *Portfolio*"));
        assert!(portfolio.contains(r#"{"eth":"1.5"}"#));

        assert!(say(&h, "carol", "/fees").await.starts_with("💰 *Claimable Fees*"));
        assert!(say(&h, "carol", "/claimfees").await.starts_with("✅ *Fees Claimed!*"));
        assert!(say(&h, "carol", "/token 0xabc").await.contains(r#""name":"Claw""#));

        assert_eq!(
            h.gateway.paths(),
            vec![
                "/portfolio",
                "/token-launches/fees",
                "/token-launches/fees/claim",
                "/token-launches/0xabc"
            ]
        );
        let statuses = h.statuses.lock().unwrap();
        assert_eq!(statuses.iter().filter(|(kind, _)| kind == "status").count(), 4);
        assert_eq!(statuses.iter().filter(|(kind, _)| kind == "thinking").count(), 4);
    }

    #[tokio::test]
    async fn progress_text_is_sent_once_per_notice() {
        let h = harness(
            PathGateway::default().with("/token-launches/deploy", deploy_ok()),
            vec![],
        );
        h.store
            .set("dave", &SecretString::from(GOOD_KEY))
            .await
            .unwrap();
        for text in ["/deploy", "Claw", "skip", "skip", "skip", "confirm"] {
            say(&h, "dave", text).await;
        }

        let statuses = h.statuses.lock().unwrap();
        let texts: Vec<&str> = statuses
            .iter()
            .map(|(_, text)| text.as_str())
            .filter(|text| !text.is_empty())
            .collect();
        assert!(texts.iter().any(|t| t.contains("Deploying")), "{texts:?}");
        for text in &texts {
            assert_eq!(texts.iter().filter(|t| *t == text).count(), 1, "{text} repeated");
        }
        assert!(statuses
            .iter()
            .filter(|(kind, _)| kind == "thinking")
            .all(|(_, text)| text.is_empty()));
    }

    #[tokio::test]
    async fn token_without_or_with_bad_address_never_calls_api() {
        let h = harness(PathGateway::default(), vec![]);
        h.store
            .set("carol", &SecretString::from(GOOD_KEY))
            .await
            .unwrap();

        assert!(say(&h, "carol", "/token").await.starts_with("Usage"));
        assert!(say(&h, "carol", "/token ../portfolio").await.contains("contract address"));
        assert!(h.gateway.paths().is_empty());
    }

    #[tokio::test]
    async fn lookup_failures_show_api_message() {
        let h = harness(
            PathGateway::default()
                .with(
                    "/portfolio",
                    Err(GatewayError::Auth("API key revoked".into())),
                )
                .with(
                    "/token-launches/fees",
                    Err(GatewayError::Api {
                        status: 500,
                        message: "indexer down".into(),
                    }),
                ),
            vec![],
        );
        h.store
            .set("carol", &SecretString::from(GOOD_KEY))
            .await
            .unwrap();

        let portfolio = say(&h, "carol", "/portfolio").await;
        assert!(portfolio.contains("API key revoked"));
        assert!(portfolio.contains("/setkey"));
        assert_eq!(say(&h, "carol", "/fees").await, "❌ Error: indexer down");
    }

    #[tokio::test]
    async fn help_unknown_and_stray_text() {
        let h = harness(PathGateway::default(), vec![]);
        assert!(say(&h, "dave", "/help").await.contains("/deploy"));
        assert!(say(&h, "dave", "/moon@bantrat_bot").await.contains("`/moon`"));
        assert!(say(&h, "dave", "just chatting").await.contains("/help"));
        assert!(say(&h, "dave", "/cancel").await.contains("Nothing to cancel"));
    }

    #[tokio::test]
    async fn lookup_mid_deploy_keeps_the_session() {
        let h = harness(PathGateway::default(), vec![]);
        h.store
            .set("erin", &SecretString::from(GOOD_KEY))
            .await
            .unwrap();

        say(&h, "erin", "/simulate").await;
        say(&h, "erin", "Claw").await;
        say(&h, "erin", "/portfolio").await;
        assert!(say(&h, "erin", "claw").await.contains("description"));
    }

    #[tokio::test]
    async fn idle_lane_reopens_on_next_message() {
        let h = harness(PathGateway::default(), vec![]);
        let dispatcher = Dispatcher {
            lane_idle_timeout: Duration::from_millis(10),
            ..h.dispatcher
        };
        let mut lanes = HashMap::new();

        dispatcher.enqueue(&mut lanes, IncomingMessage::new("test", "frank", "/help"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(lanes["frank"].tx.is_closed());

        dispatcher.enqueue(&mut lanes, IncomingMessage::new("test", "frank", "/help"));
        assert!(!lanes["frank"].tx.is_closed());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(replies_for(&h.replies, "frank").len(), 2);
    }
}
