//! Conversation state machine: which step of which flow a user is in.

use serde::{Deserialize, Serialize};

/// The states a user's conversation can be in.
///
/// Onboarding: Idle → AwaitingKey → Idle.
/// Deploy: Idle → CollectName → CollectSymbol → CollectDescription →
/// CollectImage → Confirm → Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Idle,
    AwaitingKey,
    CollectName,
    CollectSymbol,
    CollectDescription,
    CollectImage,
    Confirm,
}

impl FlowState {
    /// Check if a transition from `self` to `target` is valid.
    ///
    /// Returning to `Idle` is always allowed (completion or cancellation),
    /// and `AwaitingKey` may repeat itself when a key is rejected.
    pub fn can_transition_to(&self, target: FlowState) -> bool {
        use FlowState::*;
        matches!(
            (self, target),
            (Idle, AwaitingKey)
                | (Idle, CollectName)
                | (AwaitingKey, AwaitingKey)
                | (CollectName, CollectSymbol)
                | (CollectSymbol, CollectDescription)
                | (CollectDescription, CollectImage)
                | (CollectImage, Confirm)
                | (_, Idle)
        )
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingKey => "awaiting_key",
            Self::CollectName => "collect_name",
            Self::CollectSymbol => "collect_symbol",
            Self::CollectDescription => "collect_description",
            Self::CollectImage => "collect_image",
            Self::Confirm => "confirm",
        };
        write!(f, "{s}")
    }
}
