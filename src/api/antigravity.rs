// Antigravity v1internal client and request envelope

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use super::errors::GatewayError;
use super::mappers::upstream::UpstreamRequest;
use crate::config::UpstreamConfig;

const GENERATE_PATH: &str = "/v1internal:generateContent";
const STREAM_PATH: &str = "/v1internal:streamGenerateContent?alt=sse";

/// The v1internal request wrapper around a translated request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamEnvelope {
    pub project: String,
    pub model: String,
    pub request: EnvelopeRequest,
    pub request_id: String,
    pub user_agent: &'static str,
    pub request_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeRequest {
    #[serde(flatten)]
    pub inner: UpstreamRequest,
    pub session_id: String,
}

impl UpstreamEnvelope {
    pub fn new(request: UpstreamRequest, model: &str, project_id: Option<&str>) -> Self {
        let session_id = stable_session_id(&request);
        Self {
            project: project_id
                .map(str::to_string)
                .unwrap_or_else(generate_project_id),
            model: model.to_string(),
            request: EnvelopeRequest {
                inner: request,
                session_id,
            },
            request_id: format!("agent-{}", Uuid::new_v4()),
            user_agent: "antigravity",
            request_type: "agent",
        }
    }
}

pub fn generate_project_id() -> String {
    let adjectives = ["useful", "bright", "swift", "calm", "bold"];
    let nouns = ["fuze", "wave", "spark", "flow", "core"];
    let mut rng = rand::rng();
    let adj = adjectives[rng.random_range(0..adjectives.len())];
    let noun = nouns[rng.random_range(0..nouns.len())];
    let random_part = &Uuid::new_v4().simple().to_string()[..5];
    format!("{}-{}-{}", adj, noun, random_part)
}

/// Same first user message, same session. Falls back to a random id.
pub fn stable_session_id(request: &UpstreamRequest) -> String {
    if let Some(text) = request.first_user_text() {
        let hash = Sha256::digest(text.as_bytes());
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&hash[..8]);
        let n = i64::from_be_bytes(arr) & 0x7FFF_FFFF_FFFF_FFFF;
        return format!("-{}", n);
    }
    format!("-{}", rand::rng().random_range(0..i64::MAX))
}

#[derive(Debug, Clone)]
pub struct AntigravityClient {
    http_client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl AntigravityClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
        })
    }

    pub async fn generate(
        &self,
        access_token: &str,
        envelope: &UpstreamEnvelope,
    ) -> Result<Value, GatewayError> {
        let response = self
            .send(GENERATE_PATH, access_token, envelope, "application/json")
            .await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid upstream body: {}", e)))
    }

    /// Returns the open response; the caller consumes `bytes_stream()`.
    pub async fn stream(
        &self,
        access_token: &str,
        envelope: &UpstreamEnvelope,
    ) -> Result<reqwest::Response, GatewayError> {
        self.send(STREAM_PATH, access_token, envelope, "text/event-stream")
            .await
    }

    async fn send(
        &self,
        path: &str,
        access_token: &str,
        envelope: &UpstreamEnvelope,
        accept: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(
            "Upstream request {} model={} request_id={}",
            url,
            envelope.model,
            envelope.request_id
        );

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .header("User-Agent", &self.user_agent)
            .header("Accept", accept)
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Network error for {}: {}", url, e);
                GatewayError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        tracing::warn!(
            "HTTP {} from {}: {}",
            status,
            url,
            String::from_utf8_lossy(&body)
        );
        Err(GatewayError::Upstream { status, body })
    }
}
