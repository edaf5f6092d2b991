//! Bankr API gateway.
//!
//! `Gateway` is the raw authenticated call with uniform error mapping;
//! `BankrApi` layers the typed endpoints on top of any gateway.

mod api;
mod http;
pub mod types;

pub use api::BankrApi;
pub use http::HttpGateway;
pub use types::{DeployRequest, DeployResult, FeeDistribution, FeeShare};

use async_trait::async_trait;
use secrecy::SecretString;
use uuid::Uuid;

use crate::error::GatewayError;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Header carrying the per-submission idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Either the top-level JSON payload or the normalized failure.
pub type GatewayResult = Result<serde_json::Value, GatewayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// A single API call, minus the credential.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub payload: Option<serde_json::Value>,
    pub idempotency_key: Option<Uuid>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            payload: None,
            idempotency_key: None,
        }
    }

    pub fn post(path: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            payload: Some(payload),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: Uuid) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// Authenticated access to the external API. Implementations never retry.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn call(&self, request: ApiRequest, api_key: &SecretString) -> GatewayResult;
}
