//! ConversationEngine: owns the session table and drives every flow.
//!
//! Callers must feed a given user's turns one at a time and in arrival
//! order (the dispatcher's per-user lanes do this). Different users may be
//! handled concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::session::{ConversationSession, DeployDraft, DeployStep, Flow, KeyPurpose, optional_field};
use super::state::FlowState;
use crate::credentials::CredentialStore;
use crate::error::{GatewayError, StoreError};
use crate::gateway::{BankrApi, DeployResult};

/// Required prefix of a Bankr API key.
pub const KEY_PREFIX: &str = "bk_";
/// Minimum accepted key length, prefix included.
pub const MIN_KEY_LEN: usize = 10;
/// The only input that submits a deploy from the confirm step.
pub const CONFIRM_TOKEN: &str = "confirm";

/// Format check applied before a key is verified or stored.
pub fn is_valid_key_format(candidate: &str) -> bool {
    candidate.starts_with(KEY_PREFIX) && candidate.chars().count() >= MIN_KEY_LEN
}

/// What the user is asked next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    ApiKey { purpose: KeyPurpose },
    TokenName { simulate_only: bool },
    TokenSymbol,
    TokenDescription,
    TokenImage,
    Confirm(DeploySummary),
}

/// The collected fields shown before confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySummary {
    pub simulate_only: bool,
    pub name: String,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

/// Structured outcome of one engine operation, rendered by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Prompt(Prompt),
    /// `/start` from a user who already has a key.
    WelcomeBack,
    InvalidKeyFormat,
    KeyRejected { reason: String },
    KeySaved,
    /// A deploy was requested without a stored key.
    MissingCredential,
    Cancelled { had_session: bool },
    /// Confirm step received something other than the confirm token.
    DeployAborted,
    Deployed { name: String, result: DeployResult },
    DeployFailed { name: String, error: GatewayError },
    /// Text arrived with no active (or an expired) session.
    NoSession,
}

/// Notices emitted before a blocking external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    VerifyingKey,
    Deploying { simulate_only: bool },
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn notify(&self, progress: Progress);
}

/// Discards progress notices.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn notify(&self, _progress: Progress) {}
}

pub struct ConversationEngine {
    credentials: Arc<dyn CredentialStore>,
    api: BankrApi,
    sessions: RwLock<HashMap<String, ConversationSession>>,
    idle_timeout: Duration,
}

impl ConversationEngine {
    pub fn new(credentials: Arc<dyn CredentialStore>, api: BankrApi, idle_timeout: Duration) -> Self {
        Self {
            credentials,
            api,
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn api(&self) -> &BankrApi {
        &self.api
    }

    // ── Entry points ────────────────────────────────────────────────

    /// `/start`: welcome back a registered user, otherwise ask for a key.
    pub async fn start(&self, user_id: &str) -> Result<Reply, StoreError> {
        self.clear(user_id).await;

        if self.credentials.get(user_id).await?.is_some() {
            return Ok(Reply::WelcomeBack);
        }

        let purpose = KeyPurpose::Register;
        self.open(user_id, Flow::Onboarding { purpose }).await;
        Ok(Reply::Prompt(Prompt::ApiKey { purpose }))
    }

    /// `/setkey`: ask for a replacement key.
    pub async fn set_key(&self, user_id: &str) -> Reply {
        self.clear(user_id).await;

        let purpose = KeyPurpose::Update;
        self.open(user_id, Flow::Onboarding { purpose }).await;
        Reply::Prompt(Prompt::ApiKey { purpose })
    }

    /// `/deploy` (`simulate_only = false`) or `/simulate` (`true`).
    pub async fn deploy(&self, user_id: &str, simulate_only: bool) -> Result<Reply, StoreError> {
        self.clear(user_id).await;

        if self.credentials.get(user_id).await?.is_none() {
            return Ok(Reply::MissingCredential);
        }

        self.open(user_id, Flow::Deploy(DeployDraft::new(simulate_only)))
            .await;
        Ok(Reply::Prompt(Prompt::TokenName { simulate_only }))
    }

    /// `/cancel`: drop whatever the user was doing.
    pub async fn cancel(&self, user_id: &str) -> Reply {
        let had_session = self.clear(user_id).await;
        if had_session {
            info!(user_id = %user_id, "Conversation cancelled");
        }
        Reply::Cancelled { had_session }
    }

    // ── Turns ───────────────────────────────────────────────────────

    /// Feed one free-text message to the user's active session.
    pub async fn handle_text(
        &self,
        user_id: &str,
        text: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Reply, StoreError> {
        let Some(session) = self.take_live(user_id).await else {
            return Ok(Reply::NoSession);
        };

        match session.flow.clone() {
            Flow::Onboarding { .. } => self.receive_key(session, text, progress).await,
            Flow::Deploy(draft) => self.advance_deploy(session, draft, text, progress).await,
        }
    }

    async fn receive_key(
        &self,
        session: ConversationSession,
        text: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Reply, StoreError> {
        let candidate = text.trim();

        if !is_valid_key_format(candidate) {
            debug!(user_id = %session.user_id, "Rejected key with invalid format");
            self.restore(session).await;
            return Ok(Reply::InvalidKeyFormat);
        }

        progress.notify(Progress::VerifyingKey).await;
        let api_key = SecretString::from(candidate.to_string());

        match self.api.check_key(&api_key).await {
            Err(GatewayError::Auth(reason)) => {
                info!(user_id = %session.user_id, "Bankr rejected API key");
                self.restore(session).await;
                return Ok(Reply::KeyRejected { reason });
            }
            Err(e) => {
                warn!(user_id = %session.user_id, "Key check failed without an auth error, accepting key: {e}");
            }
            Ok(_) => {}
        }

        if let Err(e) = self.credentials.set(&session.user_id, &api_key).await {
            self.restore(session).await;
            return Err(e);
        }

        Ok(Reply::KeySaved)
    }

    async fn advance_deploy(
        &self,
        mut session: ConversationSession,
        mut draft: DeployDraft,
        text: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Reply, StoreError> {
        let from = draft.step.state();

        let reply = match draft.step {
            DeployStep::Name => {
                draft.name = Some(text.trim().to_string());
                draft.step = DeployStep::Symbol;
                Prompt::TokenSymbol
            }
            DeployStep::Symbol => {
                draft.symbol = optional_field(text).map(|s| s.to_uppercase());
                draft.step = DeployStep::Description;
                Prompt::TokenDescription
            }
            DeployStep::Description => {
                draft.description = optional_field(text);
                draft.step = DeployStep::Image;
                Prompt::TokenImage
            }
            DeployStep::Image => {
                draft.image = optional_field(text);
                draft.step = DeployStep::Confirm;
                Prompt::Confirm(DeploySummary {
                    simulate_only: draft.simulate_only,
                    name: draft.name.clone().unwrap_or_default(),
                    symbol: draft.symbol.clone(),
                    description: draft.description.clone(),
                    image: draft.image.clone(),
                })
            }
            DeployStep::Confirm => {
                return self.submit(&session.user_id, draft, text, progress).await;
            }
        };

        debug_assert!(from.can_transition_to(draft.step.state()));
        debug!(user_id = %session.user_id, from = %from, to = %draft.step.state(), "Deploy step");

        session.flow = Flow::Deploy(draft);
        self.restore(session).await;
        Ok(Reply::Prompt(reply))
    }

    /// Confirm step. The session is already out of the table and stays out.
    async fn submit(
        &self,
        user_id: &str,
        draft: DeployDraft,
        text: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Reply, StoreError> {
        if text.trim().to_lowercase() != CONFIRM_TOKEN {
            info!(user_id = %user_id, "Deploy not confirmed");
            return Ok(Reply::DeployAborted);
        }

        let Some(request) = draft.to_request() else {
            warn!(user_id = %user_id, "Confirm reached without a token name");
            return Ok(Reply::DeployAborted);
        };

        let Some(api_key) = self.credentials.get(user_id).await? else {
            return Ok(Reply::MissingCredential);
        };

        progress
            .notify(Progress::Deploying {
                simulate_only: request.simulate_only,
            })
            .await;

        info!(
            user_id = %user_id,
            token = %request.token_name,
            simulate = request.simulate_only,
            idempotency_key = %draft.idempotency_key,
            "Submitting deploy"
        );

        let name = request.token_name.clone();
        match self
            .api
            .deploy(&request, &api_key, Some(draft.idempotency_key))
            .await
        {
            Ok(result) => {
                info!(user_id = %user_id, address = %result.token_address, simulated = result.simulated, "Deploy succeeded");
                Ok(Reply::Deployed { name, result })
            }
            Err(error) => {
                warn!(user_id = %user_id, "Deploy failed: {error}");
                Ok(Reply::DeployFailed { name, error })
            }
        }
    }

    // ── Session table ───────────────────────────────────────────────

    /// Current state for a user (`Idle` when no live session exists).
    pub async fn state(&self, user_id: &str) -> FlowState {
        self.session(user_id)
            .await
            .map(|s| s.state())
            .unwrap_or_default()
    }

    /// Snapshot of the user's live session.
    pub async fn session(&self, user_id: &str) -> Option<ConversationSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(user_id)
            .filter(|s| !s.is_idle(Utc::now(), self.idle_timeout))
            .cloned()
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop every session idle past the timeout. Returns how many were dropped.
    pub async fn prune_idle(&self) -> usize {
        self.prune_idle_at(Utc::now()).await
    }

    pub async fn prune_idle_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_idle(now, self.idle_timeout));
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(pruned, remaining = sessions.len(), "Pruned idle conversations");
        }
        pruned
    }

    async fn open(&self, user_id: &str, flow: Flow) {
        let session = ConversationSession::new(user_id, flow);
        debug!(user_id = %user_id, state = %session.state(), "Conversation started");
        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), session);
    }

    async fn clear(&self, user_id: &str) -> bool {
        self.sessions.write().await.remove(user_id).is_some()
    }

    /// Remove and return the user's session unless it has gone idle.
    async fn take_live(&self, user_id: &str) -> Option<ConversationSession> {
        let session = self.sessions.write().await.remove(user_id)?;
        if session.is_idle(Utc::now(), self.idle_timeout) {
            info!(user_id = %user_id, state = %session.state(), "Discarded idle conversation");
            return None;
        }
        Some(session)
    }

    async fn restore(&self, mut session: ConversationSession) {
        session.touch();
        self.sessions
            .write()
            .await
            .insert(session.user_id.clone(), session);
    }
}

/// Periodically drop idle sessions.
pub fn spawn_idle_sweeper(
    engine: Arc<ConversationEngine>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            engine.prune_idle().await;
        }
    })
}
