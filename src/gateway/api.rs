//! Typed Bankr endpoints.

use std::sync::Arc;

use secrecy::SecretString;
use uuid::Uuid;

use super::types::{DeployRequest, DeployResult};
use super::{ApiRequest, Gateway, GatewayResult};
use crate::error::GatewayError;

pub const DEPLOY_PATH: &str = "/token-launches/deploy";
pub const PORTFOLIO_PATH: &str = "/portfolio";
pub const FEES_PATH: &str = "/token-launches/fees";
pub const CLAIM_FEES_PATH: &str = "/token-launches/fees/claim";

/// The Bankr operations the bot uses, over any [`Gateway`].
#[derive(Clone)]
pub struct BankrApi {
    gateway: Arc<dyn Gateway>,
}

impl BankrApi {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Submit a deployment (or simulation).
    pub async fn deploy(
        &self,
        request: &DeployRequest,
        api_key: &SecretString,
        idempotency_key: Option<Uuid>,
    ) -> Result<DeployResult, GatewayError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| GatewayError::Transport(format!("Failed to encode request: {e}")))?;

        let mut call = ApiRequest::post(DEPLOY_PATH, payload);
        if let Some(key) = idempotency_key {
            call = call.with_idempotency_key(key);
        }

        let payload = self.gateway.call(call, api_key).await?;
        DeployResult::from_payload(payload)
    }

    /// Send a simulate-only deploy to check that a key is accepted.
    ///
    /// Returns the raw result; callers decide which failures matter.
    pub async fn check_key(&self, api_key: &SecretString) -> GatewayResult {
        let payload = serde_json::to_value(DeployRequest::key_check())
            .map_err(|e| GatewayError::Transport(format!("Failed to encode request: {e}")))?;
        self.gateway
            .call(ApiRequest::post(DEPLOY_PATH, payload), api_key)
            .await
    }

    pub async fn portfolio(&self, api_key: &SecretString) -> GatewayResult {
        self.gateway.call(ApiRequest::get(PORTFOLIO_PATH), api_key).await
    }

    pub async fn fees(&self, api_key: &SecretString) -> GatewayResult {
        self.gateway.call(ApiRequest::get(FEES_PATH), api_key).await
    }

    pub async fn claim_fees(&self, api_key: &SecretString) -> GatewayResult {
        self.gateway
            .call(ApiRequest::post(CLAIM_FEES_PATH, serde_json::json!({})), api_key)
            .await
    }

    pub async fn token(&self, address: &str, api_key: &SecretString) -> GatewayResult {
        self.gateway
            .call(ApiRequest::get(format!("/token-launches/{address}")), api_key)
            .await
    }
}
