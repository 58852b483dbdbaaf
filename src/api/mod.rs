// HTTP API Server module

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::providers::AntigravityOAuth;
use crate::auth::CredentialPool;
use crate::config::AppConfig;

pub mod antigravity;
pub mod errors;
mod handlers;
pub mod mappers;
pub mod model_router;
pub mod streaming;

use antigravity::AntigravityClient;
use model_router::ModelResolver;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: Arc<CredentialPool>,
    pub models: Arc<ModelResolver>,
    pub upstream: AntigravityClient,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let upstream =
            AntigravityClient::new(&config.upstream).context("Failed to build upstream client")?;
        let refresher = AntigravityOAuth::new(config.oauth.clone(), reqwest::Client::new());
        let pool = CredentialPool::new(config.accounts.to_source(), Arc::new(refresher));
        let models = ModelResolver::new(config.model_mapping.to_source());

        Ok(Self {
            config: Arc::new(config),
            pool: Arc::new(pool),
            models: Arc::new(models),
            upstream,
        })
    }
}

/// The caller's key from `Authorization: Bearer`, `x-api-key` or `x-goog-api-key`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        return Some(auth.strip_prefix("Bearer ").unwrap_or(auth).trim());
    }
    ["x-api-key", "x-goog-api-key"]
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(str::trim)
}

/// API Key authentication middleware
async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    // If no API keys configured, allow all requests
    if state.config.api_keys.is_empty() {
        return next.run(request).await;
    }

    let is_valid = presented_key(request.headers())
        .map(|key| state.config.api_keys.iter().any(|k| k == key))
        .unwrap_or(false);

    if is_valid {
        next.run(request).await
    } else {
        tracing::debug!("Rejected request to {} with missing or invalid key", request.uri());
        (
            StatusCode::UNAUTHORIZED,
            [("Content-Type", "application/json")],
            r#"{"error":{"message":"Invalid API key","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        )
            .into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Routes that require API key authentication
    let protected_routes = Router::new()
        .route("/v1/models", get(handlers::openai_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/messages", post(handlers::claude_messages))
        .route("/v1beta/models", get(handlers::gemini_models))
        .route("/v1beta/models/*action", post(handlers::gemini_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let public_routes = Router::new().route("/", get(handlers::root));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let host = if config.host.is_empty() {
        "0.0.0.0".to_string()
    } else {
        config.host.clone()
    };
    let addr = format!("{}:{}", host, config.port);

    let state = AppState::new(config)?;
    state.pool.reload();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_presented_key_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_key(&headers), None);

        headers.insert("x-goog-api-key", HeaderValue::from_static("goog"));
        assert_eq!(presented_key(&headers), Some("goog"));

        headers.insert("x-api-key", HeaderValue::from_static("anthropic"));
        assert_eq!(presented_key(&headers), Some("anthropic"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-1"));
        assert_eq!(presented_key(&headers), Some("sk-1"));
    }
}
