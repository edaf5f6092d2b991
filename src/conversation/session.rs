//! Per-user session records and the typed deploy draft.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::FlowState;
use crate::gateway::DeployRequest;

/// Input that leaves an optional field unset.
pub const SKIP_SENTINEL: &str = "skip";

/// Why the user is being asked for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    /// First contact via `/start`.
    Register,
    /// Replacing an existing key via `/setkey`.
    Update,
}

/// Deploy step. Each maps onto one `FlowState::Collect*`/`Confirm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    Name,
    Symbol,
    Description,
    Image,
    Confirm,
}

impl DeployStep {
    pub fn state(&self) -> FlowState {
        match self {
            Self::Name => FlowState::CollectName,
            Self::Symbol => FlowState::CollectSymbol,
            Self::Description => FlowState::CollectDescription,
            Self::Image => FlowState::CollectImage,
            Self::Confirm => FlowState::Confirm,
        }
    }
}

/// Fields gathered so far for a deploy or simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployDraft {
    pub simulate_only: bool,
    pub step: DeployStep,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    /// Sent with the final submission so a resent deploy is not applied twice.
    pub idempotency_key: Uuid,
}

impl DeployDraft {
    pub fn new(simulate_only: bool) -> Self {
        Self {
            simulate_only,
            step: DeployStep::Name,
            name: None,
            symbol: None,
            description: None,
            image: None,
            idempotency_key: Uuid::new_v4(),
        }
    }

    /// Build the API request. `None` until a name has been collected.
    pub fn to_request(&self) -> Option<DeployRequest> {
        Some(DeployRequest {
            token_name: self.name.clone()?,
            token_symbol: self.symbol.clone(),
            description: self.description.clone(),
            image: self.image.clone(),
            simulate_only: self.simulate_only,
        })
    }
}

/// Normalize an optional-field answer: the skip sentinel means unset.
pub fn optional_field(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case(SKIP_SENTINEL) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Which flow a session belongs to, with its flow-specific data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum Flow {
    Onboarding { purpose: KeyPurpose },
    Deploy(DeployDraft),
}

/// One user's in-progress interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub user_id: String,
    pub flow: Flow,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(user_id: impl Into<String>, flow: Flow) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            flow,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> FlowState {
        match &self.flow {
            Flow::Onboarding { .. } => FlowState::AwaitingKey,
            Flow::Deploy(draft) => draft.step.state(),
        }
    }

    /// Whether the session has seen no input for longer than `timeout` at `now`.
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.updated_at)
            .to_std()
            .map(|idle| idle > timeout)
            .unwrap_or(false)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
