// API request handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::{sse::Sse, IntoResponse, Json, Response},
};
use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use super::antigravity::UpstreamEnvelope;
use super::errors::{GatewayError, Protocol};
use super::mappers::upstream::{parse_response, unwrap_response, UpstreamRequest};
use super::mappers::{claude, gemini, openai};
use super::streaming::{transcode, SseFrame, StreamEncoder};
use super::AppState;
use crate::auth::Credential;

// Root endpoint
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "Antigravity Gateway",
        "endpoints": [
            "POST /v1/chat/completions",
            "GET /v1/models",
            "POST /v1/messages",
            "GET /v1beta/models",
            "POST /v1beta/models/{model}:generateContent",
            "POST /v1beta/models/{model}:streamGenerateContent"
        ],
        "accounts": state.pool.len()
    }))
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

pub async fn openai_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let created = chrono::Utc::now().timestamp();
    let data = state
        .models
        .known_models()
        .into_iter()
        .map(|id| ModelInfo {
            owned_by: if id.starts_with("claude") {
                "anthropic"
            } else {
                "google"
            },
            id,
            object: "model",
            created,
        })
        .collect();

    Json(ModelsResponse {
        object: "list",
        data,
    })
}

pub async fn gemini_models(State(state): State<AppState>) -> Json<Value> {
    let models: Vec<Value> = state
        .models
        .known_models()
        .into_iter()
        .map(|id| {
            json!({
                "name": format!("models/{}", id),
                "displayName": id,
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent"]
            })
        })
        .collect();
    Json(json!({ "models": models }))
}

pub async fn chat_completions(State(state): State<AppState>, body: Bytes) -> Response {
    openai_chat(&state, &body)
        .await
        .unwrap_or_else(|e| e.into_response_for(Protocol::OpenAi))
}

async fn openai_chat(state: &AppState, body: &[u8]) -> Result<Response, GatewayError> {
    let request: openai::ChatCompletionRequest = parse_body(body)?;
    request.validate()?;

    let call = prepare(state, &request.model, openai::to_upstream(&request)).await?;
    if request.stream {
        let encoder = openai::OpenAiStreamEncoder::new(request.model.as_str());
        return call.stream(state, encoder).await;
    }

    let response = call.generate(state).await?;
    let (_, response) = parse_response(response).map_err(invalid_upstream_body)?;
    Ok(Json(openai::from_upstream(&response, &request.model)).into_response())
}

pub async fn claude_messages(State(state): State<AppState>, body: Bytes) -> Response {
    claude_chat(&state, &body)
        .await
        .unwrap_or_else(|e| e.into_response_for(Protocol::Claude))
}

async fn claude_chat(state: &AppState, body: &[u8]) -> Result<Response, GatewayError> {
    let request: claude::MessagesRequest = parse_body(body)?;
    request.validate()?;

    let call = prepare(state, &request.model, claude::to_upstream(&request)).await?;
    if request.stream {
        let encoder = claude::ClaudeStreamEncoder::new(request.model.as_str());
        return call.stream(state, encoder).await;
    }

    let response = call.generate(state).await?;
    let (_, response) = parse_response(response).map_err(invalid_upstream_body)?;
    Ok(Json(claude::from_upstream(&response, &request.model)).into_response())
}

/// `POST /v1beta/models/{model}:{method}`
pub async fn gemini_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
    body: Bytes,
) -> Response {
    gemini_generate(&state, &action, &body)
        .await
        .unwrap_or_else(|e| e.into_response_for(Protocol::Gemini))
}

async fn gemini_generate(
    state: &AppState,
    action: &str,
    body: &[u8],
) -> Result<Response, GatewayError> {
    let (model, method) = action
        .trim_start_matches('/')
        .rsplit_once(':')
        .filter(|(model, _)| !model.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest(format!("unsupported action '{}'", action)))?;

    let stream = match method {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return Err(GatewayError::InvalidRequest(format!(
                "unsupported method '{}'",
                other
            )))
        }
    };

    let request: gemini::GenerateContentRequest = parse_body(body)?;
    request.validate()?;

    let call = prepare(state, model, gemini::to_upstream(&request)).await?;
    if stream {
        return call.stream(state, gemini::NativeStreamEncoder::default()).await;
    }

    let response = call.generate(state).await?;
    Ok(Json(gemini::from_upstream(unwrap_response(response))).into_response())
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("malformed request body: {}", e)))
}

fn invalid_upstream_body(e: anyhow::Error) -> GatewayError {
    GatewayError::Transport(format!("invalid upstream body: {}", e))
}

/// A credential and a ready-to-send envelope.
struct UpstreamCall {
    credential: Credential,
    envelope: UpstreamEnvelope,
}

async fn prepare(
    state: &AppState,
    requested_model: &str,
    request: UpstreamRequest,
) -> Result<UpstreamCall, GatewayError> {
    let credential = state.pool.acquire().await.ok_or_else(|| {
        tracing::warn!("No usable upstream credential for model {}", requested_model);
        GatewayError::NoCredential
    })?;

    let model = state.models.resolve(requested_model);
    tracing::info!(
        "Routing {} -> {} via account {}",
        requested_model,
        model,
        credential.email
    );

    let envelope = UpstreamEnvelope::new(request, &model, credential.project_id.as_deref());
    Ok(UpstreamCall {
        credential,
        envelope,
    })
}

impl UpstreamCall {
    async fn generate(&self, state: &AppState) -> Result<Value, GatewayError> {
        state
            .upstream
            .generate(&self.credential.access_token, &self.envelope)
            .await
    }

    async fn stream<C: StreamEncoder + 'static>(
        &self,
        state: &AppState,
        encoder: C,
    ) -> Result<Response, GatewayError> {
        let upstream = state
            .upstream
            .stream(&self.credential.access_token, &self.envelope)
            .await?;
        let events = transcode(upstream.bytes_stream(), encoder).map(|r| r.map(SseFrame::into_event));
        Ok(Sse::new(events).into_response())
    }
}
