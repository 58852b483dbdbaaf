// Gateway errors and their per-protocol wire shapes

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};

/// Header marking an error body that was produced by the upstream provider.
pub const ERROR_ORIGIN_HEADER: &str = "x-gateway-error-origin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    OpenAi,
    Claude,
    Gemini,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no upstream credential available")]
    NoCredential,

    #[error("upstream returned {status}")]
    Upstream { status: StatusCode, body: Bytes },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream stream error: {0}")]
    Stream(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NoCredential => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { status, .. } => *status,
            Self::Transport(_) | Self::Stream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Render the error the way callers of `protocol` expect it.
    pub fn into_response_for(self, protocol: Protocol) -> Response {
        if let Self::Upstream { status, body } = self {
            tracing::warn!("Passing through upstream error {}", status);
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            headers.insert(ERROR_ORIGIN_HEADER, HeaderValue::from_static("upstream"));
            return response;
        }

        let (status, body) = match protocol {
            Protocol::OpenAi => self.openai_body(),
            Protocol::Claude => self.claude_body(),
            Protocol::Gemini => self.gemini_body(),
        };
        (status, Json(body)).into_response()
    }

    fn openai_body(&self) -> (StatusCode, Value) {
        let (kind, code) = match self {
            Self::InvalidRequest(_) => ("invalid_request_error", "invalid_request"),
            Self::NoCredential => ("service_unavailable", "no_credential_available"),
            _ => ("upstream_error", "bad_gateway"),
        };
        (
            self.status(),
            json!({
                "error": {
                    "message": self.to_string(),
                    "type": kind,
                    "param": null,
                    "code": code
                }
            }),
        )
    }

    fn claude_body(&self) -> (StatusCode, Value) {
        let (status, kind) = match self {
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            // Anthropic signals capacity problems with 529.
            Self::NoCredential => (overloaded(), "overloaded_error"),
            _ => (StatusCode::BAD_GATEWAY, "api_error"),
        };
        (
            status,
            json!({
                "type": "error",
                "error": {
                    "type": kind,
                    "message": self.to_string()
                }
            }),
        )
    }

    fn gemini_body(&self) -> (StatusCode, Value) {
        let status_name = match self {
            Self::InvalidRequest(_) => "INVALID_ARGUMENT",
            Self::NoCredential => "UNAVAILABLE",
            _ => "INTERNAL",
        };
        let status = self.status();
        (
            status,
            json!({
                "error": {
                    "code": status.as_u16(),
                    "message": self.to_string(),
                    "status": status_name
                }
            }),
        )
    }
}

fn overloaded() -> StatusCode {
    StatusCode::from_u16(529).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_no_credential_shapes() {
        let openai = GatewayError::NoCredential.into_response_for(Protocol::OpenAi);
        assert_eq!(openai.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(openai).await;
        assert_eq!(body["error"]["type"], "service_unavailable");
        assert_eq!(body["error"]["code"], "no_credential_available");

        let claude = GatewayError::NoCredential.into_response_for(Protocol::Claude);
        assert_eq!(claude.status().as_u16(), 529);
        let body = body_json(claude).await;
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "overloaded_error");

        let gemini = GatewayError::NoCredential.into_response_for(Protocol::Gemini);
        assert_eq!(gemini.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(gemini).await;
        assert_eq!(body["error"]["code"], 503);
        assert_eq!(body["error"]["status"], "UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_upstream_errors_pass_through() {
        let err = GatewayError::Upstream {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: Bytes::from_static(br#"{"error":{"code":429,"message":"quota"}}"#),
        };
        let response = err.into_response_for(Protocol::Claude);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[ERROR_ORIGIN_HEADER], "upstream");
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "quota");
    }

    #[tokio::test]
    async fn test_invalid_request_is_400_everywhere() {
        for protocol in [Protocol::OpenAi, Protocol::Claude, Protocol::Gemini] {
            let response =
                GatewayError::InvalidRequest("messages is empty".into()).into_response_for(protocol);
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }
}
