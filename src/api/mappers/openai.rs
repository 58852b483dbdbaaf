// OpenAI chat-completions <-> upstream

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::common_utils::{image_from_url, StopSequences};
use super::upstream::{
    Content, FinishReason, GenerationConfig, Part, Role, SystemInstruction, UpstreamRequest,
    UpstreamResponse, UsageMetadata,
};
use crate::api::errors::GatewayError;
use crate::api::streaming::{SseFrame, StreamEncoder, UpstreamChunk};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<StopSequences>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImageUrl {
    Object { url: String },
    Plain(String),
}

impl ImageUrl {
    fn url(&self) -> &str {
        match self {
            Self::Object { url } | Self::Plain(url) => url,
        }
    }
}

impl ChatCompletionRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("model is required".into()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "messages must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn content_parts(content: &MessageContent) -> Vec<Part> {
    match content {
        MessageContent::Text(text) => vec![Part::text(text.clone())],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(Part::text(text.clone())),
                ContentPart::ImageUrl { image_url } => image_from_url(image_url.url()),
                ContentPart::Unsupported => None,
            })
            .collect(),
    }
}

pub fn to_upstream(request: &ChatCompletionRequest) -> UpstreamRequest {
    let mut contents = Vec::new();
    let mut system_parts = Vec::new();

    for message in &request.messages {
        let Some(content) = &message.content else {
            continue;
        };
        let parts = content_parts(content);
        if parts.is_empty() {
            continue;
        }

        match message.role.as_str() {
            "system" | "developer" => system_parts.extend(parts),
            "assistant" => contents.push(Content {
                role: Role::Model,
                parts,
            }),
            _ => contents.push(Content {
                role: Role::User,
                parts,
            }),
        }
    }

    UpstreamRequest {
        contents,
        system_instruction: (!system_parts.is_empty())
            .then(|| SystemInstruction { parts: system_parts }),
        generation_config: GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens.or(request.max_completion_tokens),
            stop_sequences: request
                .stop
                .clone()
                .map(StopSequences::into_vec)
                .unwrap_or_default(),
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<UsageMetadata> for Usage {
    fn from(usage: UsageMetadata) -> Self {
        Self {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        }
    }
}

pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub fn from_upstream(response: &UpstreamResponse, model: &str) -> ChatCompletionResponse {
    let finish_reason = response
        .finish_reason()
        .unwrap_or(FinishReason::Stop)
        .openai();

    ChatCompletionResponse {
        id: new_completion_id(),
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content: response.text(),
            },
            finish_reason,
        }],
        usage: response.usage().into(),
    }
}

/// Flat `chat.completion.chunk` deltas terminated by `[DONE]`.
pub struct OpenAiStreamEncoder {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    done: bool,
}

impl OpenAiStreamEncoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: new_completion_id(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            role_sent: false,
            done: false,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, usage: Option<Usage>) -> SseFrame {
        let mut chunk = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason
            }]
        });
        if let Some(usage) = usage {
            chunk["usage"] = json!(usage);
        }
        SseFrame::data(chunk.to_string())
    }

    fn terminate(&mut self) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        vec![SseFrame::data("[DONE]")]
    }
}

impl StreamEncoder for OpenAiStreamEncoder {
    fn on_chunk(&mut self, chunk: &UpstreamChunk) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        let text = chunk.response.text();
        if !text.is_empty() {
            let delta = if self.role_sent {
                json!({ "content": text })
            } else {
                self.role_sent = true;
                json!({ "role": "assistant", "content": text })
            };
            frames.push(self.chunk(delta, None, None));
        }

        if let Some(reason) = chunk.response.finish_reason() {
            let usage = Usage::from(chunk.response.usage());
            frames.push(self.chunk(json!({}), Some(reason.openai()), Some(usage)));
            frames.extend(self.terminate());
        }

        frames
    }

    fn on_done(&mut self) -> Vec<SseFrame> {
        self.terminate()
    }

    fn on_eof(&mut self) -> Vec<SseFrame> {
        self.terminate()
    }

    fn is_finished(&self) -> bool {
        self.done
    }
}
