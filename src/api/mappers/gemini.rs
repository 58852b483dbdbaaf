// Gemini native generateContent <-> upstream

use serde::Deserialize;
use serde_json::{json, Value};

use super::common_utils::inline_image;
use super::upstream::{
    Content, GenerationConfig, Part, Role, SystemInstruction, UpstreamRequest, UsageMetadata,
};
use crate::api::errors::GatewayError;
use crate::api::streaming::{SseFrame, StreamEncoder, UpstreamChunk};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    #[serde(default)]
    pub contents: Vec<NativeContent>,
    #[serde(default, alias = "system_instruction")]
    pub system_instruction: Option<NativeContent>,
    #[serde(default, alias = "generation_config")]
    pub generation_config: Option<NativeGenerationConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NativeContent {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<NativePart>,
}

/// Parts are matched by field presence; unknown kinds fall through.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativePart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "inline_data")]
    pub inline_data: Option<NativeInlineData>,
    #[serde(default, alias = "file_data")]
    pub file_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeInlineData {
    #[serde(default, alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeGenerationConfig {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default, alias = "top_p")]
    pub top_p: Option<f64>,
    #[serde(default, alias = "max_output_tokens")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, alias = "stop_sequences")]
    pub stop_sequences: Option<Vec<String>>,
}

impl GenerateContentRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.contents.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "contents must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn convert_parts(parts: &[NativePart]) -> Vec<Part> {
    parts
        .iter()
        .filter_map(|part| {
            if let Some(text) = &part.text {
                return Some(Part::text(text.clone()));
            }
            if let Some(inline) = &part.inline_data {
                return inline_image(inline.mime_type.as_deref(), &inline.data);
            }
            if part.file_data.is_some() {
                tracing::debug!("Dropping fileData part");
            }
            None
        })
        .collect()
}

pub fn to_upstream(request: &GenerateContentRequest) -> UpstreamRequest {
    let contents = request
        .contents
        .iter()
        .filter_map(|content| {
            let parts = convert_parts(&content.parts);
            if parts.is_empty() {
                return None;
            }
            let role = match content.role.as_deref() {
                Some("model") => Role::Model,
                _ => Role::User,
            };
            Some(Content { role, parts })
        })
        .collect();

    let system_instruction = request
        .system_instruction
        .as_ref()
        .map(|s| convert_parts(&s.parts))
        .filter(|parts| !parts.is_empty())
        .map(|parts| SystemInstruction { parts });

    let generation_config = request
        .generation_config
        .clone()
        .map(|c| GenerationConfig {
            temperature: c.temperature,
            top_p: c.top_p,
            max_output_tokens: c.max_output_tokens,
            stop_sequences: c.stop_sequences.unwrap_or_default(),
        })
        .unwrap_or_default();

    UpstreamRequest {
        contents,
        system_instruction,
        generation_config,
    }
}

/// Return the unwrapped upstream response, filling in zero usage if absent.
pub fn from_upstream(mut raw: Value) -> Value {
    if let Value::Object(map) = &mut raw {
        map.entry("usageMetadata")
            .or_insert_with(|| json!(UsageMetadata::default()));
    }
    raw
}

/// Data-only frames carrying each upstream chunk unchanged.
#[derive(Default)]
pub struct NativeStreamEncoder {
    finished: bool,
}

impl StreamEncoder for NativeStreamEncoder {
    fn on_chunk(&mut self, chunk: &UpstreamChunk) -> Vec<SseFrame> {
        if chunk.response.finish_reason().is_some() {
            self.finished = true;
        }
        vec![SseFrame::data(chunk.raw.to_string())]
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::streaming::test_support::{finish_chunk, run, text_chunk};

    #[test]
    fn test_camel_and_snake_case_requests() {
        let camel: GenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "Hi"}]}],
            "systemInstruction": {"parts": [{"text": "Be short."}]},
            "generationConfig": {"temperature": 0.1, "topP": 0.5, "maxOutputTokens": 32, "stopSequences": ["x"]}
        }))
        .unwrap();
        let snake: GenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "Hi"}]}],
            "system_instruction": {"parts": [{"text": "Be short."}]},
            "generation_config": {"temperature": 0.1, "top_p": 0.5, "max_output_tokens": 32, "stop_sequences": ["x"]}
        }))
        .unwrap();

        let a = to_upstream(&camel);
        let b = to_upstream(&snake);
        assert_eq!(a, b);
        assert_eq!(a.generation_config.max_output_tokens, Some(32));
        assert_eq!(a.generation_config.top_p, Some(0.5));
        assert_eq!(
            a.system_instruction.unwrap().parts,
            vec![Part::text("Be short.")]
        );
    }

    #[test]
    fn test_parts_and_roles() {
        let request: GenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {"role": "user", "parts": [
                    {"text": "Look"},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}},
                    {"fileData": {"mimeType": "image/png", "fileUri": "gs://bucket/x.png"}}
                ]},
                {"role": "model", "parts": [{"text": "A cat."}]},
                {"parts": [{"fileData": {"fileUri": "gs://bucket/y.png"}}]},
                {"parts": [{"text": "And this?"}]}
            ]
        }))
        .unwrap();
        let upstream = to_upstream(&request);

        let roles: Vec<Role> = upstream.contents.iter().map(|c| c.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User]);
        assert_eq!(
            upstream.contents[0].parts,
            vec![Part::text("Look"), Part::inline("image/png", "iVBORw0KGgo=")]
        );
        assert!(upstream.generation_config.is_empty());
    }

    #[test]
    fn test_validation() {
        let request = GenerateContentRequest::default();
        assert!(matches!(request.validate(), Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn test_response_fills_usage() {
        let raw = json!({"candidates": [{"content": {"parts": [{"text": "ok"}]}}]});
        let out = from_upstream(raw);
        assert_eq!(out["usageMetadata"]["totalTokenCount"], 0);
        assert_eq!(out["candidates"][0]["content"]["parts"][0]["text"], "ok");

        let with_usage = json!({"usageMetadata": {"totalTokenCount": 9}});
        assert_eq!(from_upstream(with_usage.clone()), with_usage);
    }

    #[tokio::test]
    async fn test_stream_reemits_unwrapped_chunks() {
        let frames = run(
            vec![text_chunk("one"), finish_chunk("STOP"), text_chunk("late")],
            NativeStreamEncoder::default(),
        )
        .await;
        let frames: Vec<SseFrame> = frames.into_iter().map(Result::unwrap).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.event.is_none()));

        let first: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert!(first.get("response").is_none());
        assert_eq!(first["candidates"][0]["content"]["parts"][0]["text"], "one");
        let last: Value = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(last["candidates"][0]["finishReason"], "STOP");
    }
}
