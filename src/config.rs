//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default Bankr API base URL.
pub const DEFAULT_BANKR_BASE_URL: &str = "https://api.bankr.bot";

/// Bot configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram Bot API token. When unset only the CLI channel runs.
    pub telegram_token: Option<String>,
    /// Telegram usernames or numeric ids allowed to talk to the bot (`*` = everyone).
    pub allowed_users: Vec<String>,
    /// Whether to attach the stdin/stdout channel.
    pub enable_cli: bool,
    /// Base URL of the Bankr API.
    pub bankr_base_url: String,
    /// Path of the JSON file holding per-user API keys.
    pub keys_path: PathBuf,
    /// Per-request timeout for Bankr API calls.
    pub http_timeout: Duration,
    /// Conversations idle for longer than this are discarded.
    pub session_idle_timeout: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            allowed_users: vec!["*".to_string()],
            enable_cli: true,
            bankr_base_url: DEFAULT_BANKR_BASE_URL.to_string(),
            keys_path: PathBuf::from("./data/user_keys.json"),
            http_timeout: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(900), // 15 minutes
        }
    }
}

impl BotConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let telegram_token = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty());

        let allowed_users: Vec<String> = lookup("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let enable_cli = match lookup("BANTRAT_CLI") {
            Some(v) => parse_bool("BANTRAT_CLI", &v)?,
            None => telegram_token.is_none(),
        };
        // With the CLI switched off, Telegram is the only way in.
        if !enable_cli && telegram_token.is_none() {
            return Err(ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()));
        }

        let bankr_base_url = lookup("BANKR_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.bankr_base_url);
        if !bankr_base_url.starts_with("http://") && !bankr_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "BANKR_BASE_URL".into(),
                message: format!("expected an http(s) URL, got {bankr_base_url}"),
            });
        }

        let keys_path = lookup("BANTRAT_KEYS_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.keys_path);

        let http_timeout = match lookup("BANTRAT_HTTP_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_secs("BANTRAT_HTTP_TIMEOUT_SECS", &v)?),
            None => defaults.http_timeout,
        };

        let session_idle_timeout = match lookup("BANTRAT_SESSION_IDLE_SECS") {
            Some(v) => Duration::from_secs(parse_secs("BANTRAT_SESSION_IDLE_SECS", &v)?),
            None => defaults.session_idle_timeout,
        };

        Ok(Self {
            telegram_token,
            allowed_users,
            enable_cli,
            bankr_base_url,
            keys_path,
            http_timeout,
            session_idle_timeout,
        })
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        }),
        Ok(secs) => Ok(secs),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other}"),
        }),
    }
}
