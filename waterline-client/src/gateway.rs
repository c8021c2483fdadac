//! HTTP gateway: the single point of outbound REST communication.
//!
//! Attaches the bearer token when one is resolvable, applies a fixed
//! request timeout, unwraps the response envelope, and classifies every
//! failure into the gateway error taxonomy. The gateway never mutates
//! cache state; that is the query cache's job.

use crate::config::{ConfigError, SyncConfig};
use crate::lifecycle::CancelHandle;
use crate::session::TokenSource;
pub use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use waterline_core::{ApiPayload, EnvelopeStatus, GatewayError};

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    tokens: TokenSource,
}

impl HttpGateway {
    pub fn new(config: &SyncConfig, tokens: TokenSource) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a request against a path relative to the base URL.
    ///
    /// The payload is normalized before return: an envelope is unwrapped to
    /// its `data`, bare JSON passes through unchanged.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: Option<&[(String, String)]>,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(params) = params {
            request = request.query(params);
        }
        if let Some(token) = self.tokens.resolve().await {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(classify_transport)?;
        parse_response(response).await
    }

    /// As `request`, racing against a cancel handle. A tripped handle
    /// resolves to `GatewayError::Cancelled`, which callers swallow.
    pub async fn request_cancellable(
        &self,
        method: Method,
        path: &str,
        params: Option<&[(String, String)]>,
        body: Option<&Value>,
        cancel: &CancelHandle,
    ) -> Result<Value, GatewayError> {
        if cancel.is_cancelled() {
            // Fail fast instead of starting doomed work.
            return Err(GatewayError::Cancelled);
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(path, "request cancelled");
                Err(GatewayError::Cancelled)
            }
            result = self.request(method, path, params, body) => result,
        }
    }

    pub async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Value, GatewayError> {
        let params = if params.is_empty() {
            None
        } else {
            Some(params)
        };
        self.request(Method::GET, path, params, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        self.request(Method::POST, path, None, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        self.request(Method::PUT, path, None, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, GatewayError> {
        self.request(Method::DELETE, path, None, None).await
    }

    /// Probe the health endpoint, which lives outside the versioned API
    /// prefix: the version segment is stripped from the base URL and
    /// replaced with `/health`.
    pub async fn health(&self) -> Result<Value, GatewayError> {
        let url = health_url(&self.base_url);
        let request = self.client.get(&url);
        let response = request.send().await.map_err(classify_transport)?;
        parse_response(response).await
    }
}

/// Strip a trailing `/api/v<N>` segment and append `/health`.
fn health_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if let Some(pos) = trimmed.rfind("/api/") {
        let version = &trimmed[pos + "/api/".len()..];
        let is_version = version.len() > 1
            && version.starts_with('v')
            && version[1..].chars().all(|c| c.is_ascii_digit());
        if is_version {
            return format!("{}/health", &trimmed[..pos]);
        }
    }
    format!("{}/health", trimmed)
}

fn classify_transport(err: reqwest::Error) -> GatewayError {
    // Everything that never produced a response collapses into
    // Unreachable; timeouts are equivalent to network failure for retry
    // and classification purposes.
    GatewayError::Unreachable {
        reason: err.to_string(),
    }
}

async fn parse_response(response: reqwest::Response) -> Result<Value, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(GatewayError::from_status(status.as_u16(), detail));
    }
    if status.as_u16() == 204 {
        return Ok(Value::Null);
    }
    let payload: Value = response
        .json()
        .await
        .map_err(|e| GatewayError::InvalidResponse {
            reason: e.to_string(),
        })?;
    match ApiPayload::classify(payload) {
        ApiPayload::Envelope(envelope) => match envelope.status {
            EnvelopeStatus::Success => Ok(envelope.data),
            EnvelopeStatus::Error => Err(GatewayError::ClientError {
                status: status.as_u16(),
                detail: envelope.error_detail(),
            }),
        },
        ApiPayload::Raw(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_url_strips_version_segment() {
        assert_eq!(
            health_url("http://localhost:8000/api/v1"),
            "http://localhost:8000/health"
        );
        assert_eq!(
            health_url("https://api.example.com/api/v2/"),
            "https://api.example.com/health"
        );
    }

    #[test]
    fn test_health_url_without_version_segment() {
        assert_eq!(
            health_url("http://localhost:8000"),
            "http://localhost:8000/health"
        );
        // A non-version path segment after /api/ is left intact.
        assert_eq!(
            health_url("http://localhost:8000/api/gateway"),
            "http://localhost:8000/api/gateway/health"
        );
    }
}
