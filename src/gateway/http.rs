//! reqwest-backed gateway to the Bankr HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{API_KEY_HEADER, ApiRequest, Gateway, GatewayResult, HttpMethod, IDEMPOTENCY_HEADER};
use crate::error::GatewayError;

/// Longest slice of a raw body quoted back in an error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

pub struct HttpGateway {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn call(&self, request: ApiRequest, api_key: &SecretString) -> GatewayResult {
        let url = self.url(&request.path);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        }
        .header(API_KEY_HEADER, api_key.expose_secret())
        .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(key) = request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key.to_string());
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let resp = builder.send().await.map_err(|e| {
            tracing::warn!(method = %request.method, path = %request.path, "Bankr request failed: {e}");
            self.transport_error(e)
        })?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;

        tracing::debug!(method = %request.method, path = %request.path, status, "Bankr response");
        classify_response(status, &body)
    }
}

/// Map a raw HTTP status and body onto the gateway result.
pub(crate) fn classify_response(status: u16, body: &str) -> GatewayResult {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if !(200..300).contains(&status) {
        let message = parsed
            .as_ref()
            .and_then(extract_message)
            .unwrap_or_else(|| truncate(body.trim()));
        let message = if message.is_empty() {
            format!("HTTP {status}")
        } else {
            message
        };
        return Err(error_for(status, message));
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    let Some(value) = parsed else {
        return Err(GatewayError::UnexpectedResponse(truncate(body.trim())));
    };

    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        let message = err
            .as_str()
            .map(String::from)
            .or_else(|| extract_message(&value))
            .unwrap_or_else(|| err.to_string());
        return Err(error_for(status, message));
    }

    if value.get("success") == Some(&Value::Bool(false)) {
        let message = extract_message(&value).unwrap_or_else(|| "Request was not successful".into());
        return Err(error_for(status, message));
    }

    Ok(value)
}

fn extract_message(value: &Value) -> Option<String> {
    ["message", "error"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(String::from)
}

fn error_for(status: u16, message: String) -> GatewayError {
    if status == 401 || status == 403 || message.to_lowercase().contains("auth") {
        GatewayError::Auth(message)
    } else {
        GatewayError::Api { status, message }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
