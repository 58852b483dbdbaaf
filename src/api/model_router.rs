// Model alias resolution: operator overrides, then built-ins, then pass-through

use once_cell::sync::{Lazy, OnceCell};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::BlobSource;

/// Built-in aliases for common chat and image model names.
static BUILTIN_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // OpenAI chat
    m.insert("gpt-4", "gemini-2.5-flash");
    m.insert("gpt-4-turbo", "gemini-2.5-flash");
    m.insert("gpt-4-turbo-preview", "gemini-2.5-flash");
    m.insert("gpt-4o", "gemini-2.5-flash");
    m.insert("gpt-4o-2024-08-06", "gemini-2.5-flash");
    m.insert("gpt-4o-mini", "gemini-2.5-flash");
    m.insert("gpt-4.1", "gemini-2.5-pro");
    m.insert("gpt-3.5-turbo", "gemini-2.5-flash");
    m.insert("o1", "gemini-2.5-pro");
    m.insert("o3", "gemini-2.5-pro");
    m.insert("o3-mini", "gemini-2.5-flash");

    // Claude
    m.insert("claude-3-5-sonnet-20241022", "claude-sonnet-4-5");
    m.insert("claude-3-5-sonnet-20240620", "claude-sonnet-4-5");
    m.insert("claude-3-5-sonnet-latest", "claude-sonnet-4-5");
    m.insert("claude-3-7-sonnet-20250219", "claude-sonnet-4-5");
    m.insert("claude-3-opus-20240229", "claude-opus-4-5-thinking");
    m.insert("claude-3-haiku-20240307", "claude-sonnet-4-5");
    m.insert("claude-sonnet-4-5-20250929", "claude-sonnet-4-5");
    m.insert("claude-opus-4", "claude-opus-4-5-thinking");
    m.insert("claude-haiku-4-5-20251001", "claude-sonnet-4-5");

    // Gemini shorthands
    m.insert("gemini-2.5-flash-lite", "gemini-2.5-flash");
    m.insert("gemini-3-pro", "gemini-3-pro-preview");
    m.insert("gemini-3-pro-high", "gemini-3-pro-preview");
    m.insert("gemini-3-pro-low", "gemini-3-pro-preview");

    // Image
    m.insert("dall-e-3", "gemini-3-pro-image");
    m.insert("dall-e-2", "gemini-3-pro-image");
    m.insert("gpt-image-1", "gemini-3-pro-image");

    m
});

/// Upstream models advertised on the listing endpoints.
const ADVERTISED_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.5-pro",
    "gemini-2.5-flash-thinking",
    "gemini-3-flash",
    "gemini-3-pro-preview",
    "gemini-3-pro-image",
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-thinking",
    "claude-opus-4-5-thinking",
];

pub struct ModelResolver {
    source: Arc<dyn BlobSource>,
    overrides: OnceCell<HashMap<String, String>>,
}

impl ModelResolver {
    pub fn new(source: Arc<dyn BlobSource>) -> Self {
        Self {
            source,
            overrides: OnceCell::new(),
        }
    }

    fn overrides(&self) -> &HashMap<String, String> {
        self.overrides.get_or_init(|| load_overrides(self.source.as_ref()))
    }

    pub fn resolve(&self, name: &str) -> String {
        if let Some(target) = self.overrides().get(name) {
            return target.clone();
        }
        if let Some(target) = BUILTIN_ALIASES.get(name) {
            return target.to_string();
        }
        name.to_string()
    }

    /// Advertised upstream models plus any override targets.
    pub fn known_models(&self) -> Vec<String> {
        let mut models: Vec<String> = ADVERTISED_MODELS.iter().map(|s| s.to_string()).collect();
        for target in self.overrides().values() {
            if !models.contains(target) {
                models.push(target.clone());
            }
        }
        models
    }
}

fn load_overrides(source: &dyn BlobSource) -> HashMap<String, String> {
    let raw = match source.fetch() {
        Ok(Some(raw)) if !raw.trim().is_empty() => raw,
        Ok(_) => return HashMap::new(),
        Err(e) => {
            tracing::error!("Failed to read model mapping: {:#}", e);
            return HashMap::new();
        }
    };

    match serde_json::from_str::<HashMap<String, String>>(&raw) {
        Ok(table) => {
            tracing::info!("Loaded {} model mapping override(s)", table.len());
            table
        }
        Err(e) => {
            tracing::error!("Ignoring malformed model mapping: {}", e);
            HashMap::new()
        }
    }
}
