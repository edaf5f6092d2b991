//! In-memory credential store for tests and throwaway runs.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use super::CredentialStore;
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryCredentialStore {
    keys: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored credentials.
    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, user_id: &str) -> Result<Option<SecretString>, StoreError> {
        Ok(self
            .keys
            .read()
            .await
            .get(user_id)
            .cloned()
            .map(SecretString::from))
    }

    async fn set(&self, user_id: &str, api_key: &SecretString) -> Result<(), StoreError> {
        self.keys
            .write()
            .await
            .insert(user_id.to_string(), api_key.expose_secret().to_string());
        Ok(())
    }
}
