//! Multi-turn conversation flows: onboarding and token deploys.
//!
//! Each user has at most one live session. Entry commands open a session,
//! text turns advance it, and completion, `/cancel` or the idle timeout end
//! it. The engine returns structured [`Reply`] values; turning those into
//! chat text is left to the dispatcher.

pub mod engine;
pub mod session;
pub mod state;

pub use engine::{
    CONFIRM_TOKEN, ConversationEngine, DeploySummary, KEY_PREFIX, MIN_KEY_LEN, NoProgress,
    Progress, ProgressSink, Prompt, Reply, is_valid_key_format, spawn_idle_sweeper,
};
pub use session::{ConversationSession, DeployDraft, DeployStep, Flow, KeyPurpose, SKIP_SENTINEL};
pub use state::FlowState;
