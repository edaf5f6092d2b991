//! Per-user API credential persistence.
//!
//! The store only persists; key format checks happen in the conversation
//! engine before anything reaches `set`.

mod file;
mod memory;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::StoreError;

/// Backend-agnostic credential store. One key per user, last write wins.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up the stored key for a user.
    async fn get(&self, user_id: &str) -> Result<Option<SecretString>, StoreError>;

    /// Insert or replace the key for a user and persist it.
    async fn set(&self, user_id: &str, api_key: &SecretString) -> Result<(), StoreError>;
}
