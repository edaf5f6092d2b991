//! JSON-file credential store.
//!
//! The whole mapping lives in one file. Reads load the full file; writes run
//! load-modify-save under a single writer lock and replace the file through
//! a temp file + rename, so a crash mid-write never leaves a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::CredentialStore;
use crate::error::StoreError;

/// Durable store backed by a JSON object `{ "<user_id>": "<api_key>" }`.
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full mapping. A missing or empty file is an empty mapping.
    async fn load_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Rewrite the full mapping. Callers must hold `write_lock`.
    async fn save_all(&self, keys: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let body = serde_json::to_vec_pretty(keys)?;
        let tmp_path = self.tmp_path();

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // Owner-only: the file holds API keys and the rename keeps these bits.
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&tmp_path)
            .await
            .map_err(|e| self.io_error(e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // A leftover temp file from a crashed write keeps its old mode.
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| self.io_error(e))?;
        }
        file.write_all(&body).await.map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), entries = keys.len(), "Credential file rewritten");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "user_keys.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, user_id: &str) -> Result<Option<SecretString>, StoreError> {
        let keys = self.load_all().await?;
        Ok(keys.get(user_id).cloned().map(SecretString::from))
    }

    async fn set(&self, user_id: &str, api_key: &SecretString) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut keys = self.load_all().await?;
        keys.insert(user_id.to_string(), api_key.expose_secret().to_string());
        self.save_all(&keys).await?;

        info!(user_id = %user_id, "Stored API key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> FileCredentialStore {
        FileCredentialStore::new(dir.path().join("keys.json"))
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.get("42").await.unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn set_then_get_returns_exact_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store
            .set("42", &SecretString::from("bk_live_abcdef123"))
            .await
            .unwrap();

        let key = store.get("42").await.unwrap().unwrap();
        assert_eq!(key.expose_secret(), "bk_live_abcdef123");
        assert!(store.get("43").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites_previous_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.set("7", &SecretString::from("bk_first_key_1")).await.unwrap();
        store.set("7", &SecretString::from("bk_second_key_2")).await.unwrap();

        let key = store.get("7").await.unwrap().unwrap();
        assert_eq!(key.expose_secret(), "bk_second_key_2");
    }

    #[tokio::test]
    async fn keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        store_in(&dir)
            .set("1", &SecretString::from("bk_persisted_1"))
            .await
            .unwrap();

        let reopened = store_in(&dir);
        let key = reopened.get("1").await.unwrap().unwrap();
        assert_eq!(key.expose_secret(), "bk_persisted_1");
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("keys.json");
        let store = FileCredentialStore::new(&path);

        store.set("1", &SecretString::from("bk_nested_dir")).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_file_name("keys.json.tmp").exists());
    }

    #[tokio::test]
    async fn file_is_a_plain_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.set("99", &SecretString::from("bk_on_disk_99")).await.unwrap();

        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, serde_json::json!({"99": "bk_on_disk_99"}));
    }

    #[tokio::test]
    async fn concurrent_sets_for_different_users_keep_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let key = SecretString::from(format!("bk_user_key_{i:03}"));
                    store.set(&i.to_string(), &key).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..32 {
            let key = store.get(&i.to_string()).await.unwrap();
            assert_eq!(
                key.as_ref().map(|k| k.expose_secret().to_string()),
                Some(format!("bk_user_key_{i:03}")),
                "entry for user {i} was lost"
            );
        }
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(store.path(), b"{not json").await.unwrap();

        let err = store.get("1").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn empty_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(store.path(), b"  \n").await.unwrap();

        assert!(store.get("1").await.unwrap().is_none());
        store.set("1", &SecretString::from("bk_after_empty")).await.unwrap();
        assert!(store.get("1").await.unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        // Stale temp file with a world-readable mode.
        let stale = store.tmp_path();
        tokio::fs::write(&stale, b"{}").await.unwrap();
        tokio::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644))
            .await
            .unwrap();

        store.set("7", &SecretString::from("bk_private_7")).await.unwrap();

        let mode = tokio::fs::metadata(store.path()).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
