// Claude messages <-> upstream

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::common_utils::inline_image;
use super::upstream::{
    Content, FinishReason, GenerationConfig, Part, Role, SystemInstruction, UpstreamRequest,
    UpstreamResponse, UsageMetadata,
};
use crate::api::errors::GatewayError;
use crate::api::streaming::{SseFrame, StreamEncoder, UpstreamChunk};

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ClaudeMessage>,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeMessage {
    pub role: String,
    pub content: ClaudeContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemBlock {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClaudeContent {
    Text(String),
    Blocks(Vec<ClaudeBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl MessagesRequest {
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

fn image_part(source: &ImageSource) -> Option<Part> {
    if source.source_type != "base64" {
        tracing::debug!("Dropping {} image source", source.source_type);
        return None;
    }
    inline_image(source.media_type.as_deref(), source.data.as_deref()?)
}

fn content_parts(content: &ClaudeContent) -> Vec<Part> {
    match content {
        ClaudeContent::Text(text) => vec![Part::text(text.clone())],
        ClaudeContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ClaudeBlock::Text { text } => Some(Part::text(text.clone())),
                ClaudeBlock::Image { source } => image_part(source),
                ClaudeBlock::Unsupported => None,
            })
            .collect(),
    }
}

fn system_parts(system: &SystemPrompt) -> Vec<Part> {
    match system {
        SystemPrompt::Text(text) if text.is_empty() => Vec::new(),
        SystemPrompt::Text(text) => vec![Part::text(text.clone())],
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter(|b| !b.text.is_empty())
            .map(|b| Part::text(b.text.clone()))
            .collect(),
    }
}

pub fn to_upstream(request: &MessagesRequest) -> UpstreamRequest {
    let contents = request
        .messages
        .iter()
        .filter_map(|message| {
            let parts = content_parts(&message.content);
            if parts.is_empty() {
                return None;
            }
            let role = if message.role == "assistant" {
                Role::Model
            } else {
                Role::User
            };
            Some(Content { role, parts })
        })
        .collect();

    let system_instruction = request
        .system
        .as_ref()
        .map(system_parts)
        .filter(|parts| !parts.is_empty())
        .map(|parts| SystemInstruction { parts });

    UpstreamRequest {
        contents,
        system_instruction,
        generation_config: GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop_sequences.clone().unwrap_or_default(),
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: Vec<TextBlock>,
    pub stop_reason: &'static str,
    pub stop_sequence: Option<String>,
    pub usage: ClaudeUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ClaudeUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<UsageMetadata> for ClaudeUsage {
    fn from(usage: UsageMetadata) -> Self {
        Self {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        }
    }
}

pub fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

pub fn from_upstream(response: &UpstreamResponse, model: &str) -> MessagesResponse {
    MessagesResponse {
        id: new_message_id(),
        kind: "message",
        role: "assistant",
        model: model.to_string(),
        content: vec![TextBlock {
            kind: "text",
            text: response.text(),
        }],
        stop_reason: response
            .finish_reason()
            .unwrap_or(FinishReason::Stop)
            .claude(),
        stop_sequence: None,
        usage: response.usage().into(),
    }
}

/// Claude's named-event framing around a single text block.
pub struct ClaudeStreamEncoder {
    id: String,
    model: String,
    started: bool,
    finished: bool,
}

impl ClaudeStreamEncoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            model: model.into(),
            started: false,
            finished: false,
        }
    }

    fn open(&mut self, usage: UsageMetadata, frames: &mut Vec<SseFrame>) {
        if self.started {
            return;
        }
        self.started = true;
        frames.push(SseFrame::named(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": usage.prompt_token_count, "output_tokens": 0}
                }
            }),
        ));
        frames.push(SseFrame::named(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""}
            }),
        ));
    }

    fn close(&mut self, reason: FinishReason, usage: UsageMetadata, frames: &mut Vec<SseFrame>) {
        self.open(usage, frames);
        self.finished = true;
        frames.push(SseFrame::named(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": 0}),
        ));
        frames.push(SseFrame::named(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": reason.claude(), "stop_sequence": null},
                "usage": ClaudeUsage::from(usage)
            }),
        ));
        frames.push(SseFrame::named(
            "message_stop",
            &json!({"type": "message_stop"}),
        ));
    }
}

impl StreamEncoder for ClaudeStreamEncoder {
    fn on_chunk(&mut self, chunk: &UpstreamChunk) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        let usage = chunk.response.usage();

        let text = chunk.response.text();
        if !text.is_empty() {
            self.open(usage, &mut frames);
            frames.push(SseFrame::named(
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": 0,
                    "delta": {"type": "text_delta", "text": text}
                }),
            ));
        }

        if let Some(reason) = chunk.response.finish_reason() {
            self.close(reason, usage, &mut frames);
        }

        frames
    }

    fn on_eof(&mut self) -> Vec<SseFrame> {
        if !self.finished {
            tracing::warn!("Upstream closed without a finish reason, leaving Claude stream open");
        }
        Vec::new()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::streaming::test_support::{finish_chunk, run, text_chunk};

    fn parse(raw: Value) -> MessagesRequest {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_system_and_roles() {
        let request = parse(json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 1024,
            "system": [{"type": "text", "text": "Rule one."}, {"type": "text", "text": "Rule two."}],
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": [{"type": "text", "text": "Hello!"}]}
            ],
            "stop_sequences": ["\n\nHuman:"]
        }));
        let upstream = to_upstream(&request);

        assert_eq!(
            upstream.system_instruction.unwrap().parts,
            vec![Part::text("Rule one."), Part::text("Rule two.")]
        );
        assert_eq!(upstream.contents[0].role, Role::User);
        assert_eq!(upstream.contents[1].role, Role::Model);
        assert_eq!(upstream.generation_config.max_output_tokens, Some(1024));
        assert_eq!(upstream.generation_config.stop_sequences, vec!["\n\nHuman:"]);
    }

    #[test]
    fn test_string_system_prompt() {
        let request = parse(json!({
            "model": "claude-3-opus",
            "system": "Be kind.",
            "messages": [{"role": "user", "content": "x"}]
        }));
        let upstream = to_upstream(&request);
        assert_eq!(
            upstream.system_instruction.unwrap().parts,
            vec![Part::text("Be kind.")]
        );
    }

    #[test]
    fn test_image_sources() {
        let request = parse(json!({
            "model": "claude-3-opus",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image", "source": {"type": "base64", "media_type": "image/webp", "data": "UklGRg=="}},
                    {"type": "image", "source": {"type": "url", "url": "https://example.com/x.png"}},
                    {"type": "tool_result", "tool_use_id": "t1", "content": "ok"},
                    {"type": "text", "text": "Describe it"}
                ]
            }, {
                "role": "user",
                "content": [{"type": "image", "source": {"type": "url", "url": "https://example.com/y.png"}}]
            }]
        }));
        let upstream = to_upstream(&request);
        assert_eq!(upstream.contents.len(), 1);
        assert_eq!(
            upstream.contents[0].parts,
            vec![Part::inline("image/webp", "UklGRg=="), Part::text("Describe it")]
        );
    }

    #[test]
    fn test_validation() {
        let request = parse(json!({"model": "claude-3-opus", "messages": []}));
        assert!(matches!(request.validate(), Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn test_response_translation() {
        let response: UpstreamResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "Done."}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 3, "totalTokenCount": 13}
        }))
        .unwrap();
        let message = from_upstream(&response, "claude-3-opus");
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "message");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"][0], json!({"type": "text", "text": "Done."}));
        assert_eq!(value["stop_reason"], "end_turn");
        assert_eq!(value["usage"], json!({"input_tokens": 10, "output_tokens": 3}));
        assert!(message.id.starts_with("msg_"));
    }

    #[test]
    fn test_candidate_less_response_reports_no_usage() {
        let response: UpstreamResponse = serde_json::from_value(json!({
            "usageMetadata": {"promptTokenCount": 9, "totalTokenCount": 9}
        }))
        .unwrap();
        let value = serde_json::to_value(from_upstream(&response, "claude-3-opus")).unwrap();
        assert_eq!(value["usage"], json!({"input_tokens": 0, "output_tokens": 0}));
    }

    fn events(frames: Vec<Result<SseFrame, GatewayError>>) -> Vec<&'static str> {
        frames
            .into_iter()
            .map(|f| f.unwrap().event.unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_stream_event_sequence() {
        let frames = run(
            vec![text_chunk("Hello"), text_chunk(" world"), finish_chunk("MAX_TOKENS")],
            ClaudeStreamEncoder::new("claude-3-opus"),
        )
        .await;

        let delta: Value = serde_json::from_str(&frames[2].as_ref().unwrap().data).unwrap();
        assert_eq!(delta["delta"], json!({"type": "text_delta", "text": "Hello"}));
        let message_delta: Value = serde_json::from_str(&frames[5].as_ref().unwrap().data).unwrap();
        assert_eq!(message_delta["delta"]["stop_reason"], "max_tokens");
        assert_eq!(message_delta["usage"]["output_tokens"], 2);

        assert_eq!(
            events(frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
    }

    #[tokio::test]
    async fn test_finish_without_text_opens_envelope() {
        let frames = run(
            vec![finish_chunk("STOP")],
            ClaudeStreamEncoder::new("claude-3-opus"),
        )
        .await;
        assert_eq!(
            events(frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
    }

    #[tokio::test]
    async fn test_done_sentinel_and_eof_add_no_framing() {
        let frames = run(
            vec![text_chunk("partial"), "data: [DONE]\n\n".to_string()],
            ClaudeStreamEncoder::new("claude-3-opus"),
        )
        .await;
        assert_eq!(
            events(frames),
            vec!["message_start", "content_block_start", "content_block_delta"]
        );
    }
}
