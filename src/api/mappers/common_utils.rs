// Helpers shared by the protocol mappers

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use super::upstream::Part;

pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// `stop` may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// Split a `data:<mime>;base64,<payload>` URI. Anything else is `None`.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    if data.is_empty() {
        return None;
    }
    let mime = if mime.is_empty() {
        DEFAULT_IMAGE_MIME
    } else {
        mime
    };
    Some((mime.to_string(), data.to_string()))
}

/// Build an inline-data part, rejecting payloads that are not base64.
pub fn inline_image(mime_type: Option<&str>, data: &str) -> Option<Part> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if let Err(e) = STANDARD.decode(data) {
        tracing::debug!("Dropping inline image with invalid base64: {}", e);
        return None;
    }
    let mime = mime_type
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_IMAGE_MIME);
    Some(Part::inline(mime, data))
}

/// Resolve an image URL to an inline part. Remote URLs are not fetched.
pub fn image_from_url(url: &str) -> Option<Part> {
    match parse_data_url(url) {
        Some((mime, data)) => inline_image(Some(&mime), &data),
        None => {
            tracing::debug!("Dropping non-inline image reference");
            None
        }
    }
}
