//! Request and response shapes for the Bankr token-launch API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Total basis points available for a fee split.
pub const MAX_BPS: u32 = 10_000;

/// Body of `POST /token-launches/deploy`.
///
/// Optional fields are omitted from the JSON when unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub token_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub simulate_only: bool,
}

impl DeployRequest {
    /// The request used to check that a freshly supplied key is accepted.
    pub fn key_check() -> Self {
        Self {
            token_name: "test".to_string(),
            token_symbol: None,
            description: None,
            image: None,
            simulate_only: true,
        }
    }
}

/// One recipient of the trading-fee split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeShare {
    pub bps: u32,
    pub address: String,
}

/// Role name → share, as returned by the deploy endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeDistribution(pub BTreeMap<String, FeeShare>);

impl FeeDistribution {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FeeShare)> {
        self.0.iter()
    }

    /// Summed as `u64`: shares come straight from the server.
    pub fn total_bps(&self) -> u64 {
        self.0.values().map(|s| u64::from(s.bps)).sum()
    }

    /// Every share is within 0..=10000 bps and the shares sum to at most 10000.
    pub fn is_valid(&self) -> bool {
        self.0.values().all(|s| s.bps <= MAX_BPS) && self.total_bps() <= u64::from(MAX_BPS)
    }
}

/// Outcome of a (simulated) deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub simulated: bool,
    pub token_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_distribution: Option<FeeDistribution>,
}

impl DeployResult {
    /// Parse a deploy payload that already passed the gateway envelope check.
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, GatewayError> {
        let result: DeployResult = serde_json::from_value(payload)
            .map_err(|e| GatewayError::UnexpectedResponse(e.to_string()))?;

        if !result.success {
            return Err(GatewayError::UnexpectedResponse(
                "deploy response did not report success".into(),
            ));
        }
        if let Some(dist) = &result.fee_distribution {
            if !dist.is_valid() {
                return Err(GatewayError::UnexpectedResponse(format!(
                    "fee distribution totals {} bps",
                    dist.total_bps()
                )));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_fee_shares_are_unexpected_not_overflow() {
        let err = DeployResult::from_payload(serde_json::json!({
            "success": true,
            "tokenAddress": "0x1",
            "feeDistribution": {
                "a": {"bps": u32::MAX, "address": "0xa"},
                "b": {"bps": 1, "address": "0xb"}
            }
        }))
        .unwrap_err();
        assert_eq!(
            err,
            GatewayError::UnexpectedResponse("fee distribution totals 4294967296 bps".into())
        );
    }

    #[test]
    fn deploy_request_omits_unset_fields() {
        let req = DeployRequest {
            token_name: "Claw".into(),
            token_symbol: None,
            description: None,
            image: None,
            simulate_only: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, serde_json::json!({"tokenName": "Claw", "simulateOnly": false}));
    }

    #[test]
    fn deploy_request_uses_camel_case() {
        let req = DeployRequest {
            token_name: "Claw".into(),
            token_symbol: Some("CLAW".into()),
            description: Some("a claw".into()),
            image: Some("https://img.example/claw.png".into()),
            simulate_only: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["tokenSymbol"], "CLAW");
        assert_eq!(json["description"], "a claw");
        assert_eq!(json["image"], "https://img.example/claw.png");
        assert_eq!(json["simulateOnly"], true);
    }

    #[test]
    fn key_check_is_a_simulation() {
        let check = DeployRequest::key_check();
        assert!(check.simulate_only);
        assert_eq!(
            serde_json::to_value(&check).unwrap(),
            serde_json::json!({"tokenName": "test", "simulateOnly": true})
        );
    }

    #[test]
    fn parses_full_deploy_result() {
        let payload = serde_json::json!({
            "success": true,
            "simulated": false,
            "tokenAddress": "0xabc0000000000000000000000000000000000001",
            "poolId": "0xpool",
            "txHash": "0xtx",
            "chain": "base",
            "feeDistribution": {
                "creator": {"bps": 5700, "address": "0x1111111111"},
                "bankr": {"bps": 3600, "address": "0x2222222222"},
                "protocol": {"bps": 700, "address": "0x3333333333"}
            }
        });
        let result = DeployResult::from_payload(payload).unwrap();
        assert_eq!(result.chain.as_deref(), Some("base"));
        let dist = result.fee_distribution.unwrap();
        assert_eq!(dist.total_bps(), 10_000);
        assert!(dist.is_valid());
    }

    #[test]
    fn simulated_result_needs_only_address() {
        let payload = serde_json::json!({
            "success": true,
            "simulated": true,
            "tokenAddress": "0xsim"
        });
        let result = DeployResult::from_payload(payload).unwrap();
        assert!(result.simulated);
        assert!(result.pool_id.is_none());
        assert!(result.fee_distribution.is_none());
    }

    #[test]
    fn missing_address_is_unexpected() {
        let err = DeployResult::from_payload(serde_json::json!({"success": true})).unwrap_err();
        assert!(matches!(err, GatewayError::UnexpectedResponse(_)));
    }

    #[test]
    fn unsuccessful_envelope_is_unexpected() {
        let err = DeployResult::from_payload(serde_json::json!({"tokenAddress": "0x1"}))
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnexpectedResponse(_)));
    }

    #[test]
    fn over_allocated_fee_split_is_rejected() {
        let payload = serde_json::json!({
            "success": true,
            "tokenAddress": "0x1",
            "feeDistribution": {
                "a": {"bps": 6000, "address": "0xa"},
                "b": {"bps": 6000, "address": "0xb"}
            }
        });
        let err = DeployResult::from_payload(payload).unwrap_err();
        assert!(err.to_string().contains("12000"));
    }
}
