// selfheal-gateway-rs/src/upstream.rs
//
// Upstream collaborator boundary: POST the mapped payload as JSON to the
// resolved endpoint and classify the result into a tagged outcome so the
// orchestrator's branching is explicit and exhaustive.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::normalize_local_https;
use crate::model::Payload;

/// Result of one upstream call.
#[derive(Debug, Clone)]
pub enum UpstreamOutcome {
    /// 2xx with a (possibly empty) JSON body.
    Success(serde_json::Value),
    /// Structured rejection: the upstream answered with an error status
    /// and a body the inference engine can parse as free text.
    Rejected { status: u16, body: String },
    /// Anything else: connect/timeout/protocol failures with no
    /// structured error text to learn from.
    Transport(String),
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Invoke the upstream. `endpoint` is either an absolute URL or a
    /// path relative to the configured base URL.
    async fn call(&self, endpoint: &str, payload: &Payload, timeout_ms: u64) -> UpstreamOutcome;
}

/// reqwest-backed upstream client.
pub struct HttpUpstreamClient {
    client: Client,
    base_url: String,
}

impl HttpUpstreamClient {
    /// `base_url` must already be normalized (no trailing slash).
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
        }
    }

    /// Join an endpoint with the base URL. Absolute endpoints are used
    /// as-is; relative ones lose leading slashes first so the join never
    /// produces "base//path".
    fn resolve_url(&self, endpoint: &str) -> String {
        let endpoint = normalize_local_https(endpoint, "endpoint-rule");
        if endpoint.starts_with("http") {
            endpoint
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn call(&self, endpoint: &str, payload: &Payload, timeout_ms: u64) -> UpstreamOutcome {
        let url = self.resolve_url(endpoint);
        debug!(%url, "calling upstream");

        let sent = self
            .client
            .post(&url)
            .timeout(Duration::from_millis(timeout_ms))
            .json(payload)
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => return UpstreamOutcome::Transport(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            // Tolerate empty or non-JSON success bodies.
            let body = response.text().await.unwrap_or_default();
            let data = if body.trim().is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body))
            };
            UpstreamOutcome::Success(data)
        } else {
            let body = response.text().await.unwrap_or_default();
            UpstreamOutcome::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }
}
