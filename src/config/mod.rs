// Configuration module for the gateway

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Where the upstream account list comes from
    #[serde(default)]
    pub accounts: BlobConfig,

    /// Operator overrides for model aliases
    #[serde(default)]
    pub model_mapping: BlobConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub oauth: OAuthConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            api_keys: Vec::new(),
            accounts: BlobConfig::default(),
            model_mapping: BlobConfig::default(),
            upstream: UpstreamConfig::default(),
            oauth: OAuthConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    8417
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "https://cloudcode-pa.googleapis.com".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    "antigravity/1.104.0 darwin/arm64".to_string()
}

/// Client credentials used when exchanging refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: default_token_url(),
        }
    }
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// A JSON document supplied by the operator, either inline, from a file or
/// from an environment variable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct BlobConfig {
    #[serde(default)]
    pub inline: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub env: Option<String>,
}

/// Yields the raw text of an operator-supplied JSON blob.
///
/// `Ok(None)` means nothing is configured, which callers treat as an empty
/// document rather than an error.
pub trait BlobSource: Send + Sync {
    fn fetch(&self) -> Result<Option<String>>;
}

pub struct StaticBlob(pub Option<String>);

impl BlobSource for StaticBlob {
    fn fetch(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

pub struct FileBlob(pub PathBuf);

impl BlobSource for FileBlob {
    fn fetch(&self) -> Result<Option<String>> {
        if !self.0.exists() {
            tracing::warn!("Blob file does not exist: {:?}", self.0);
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.0)
            .with_context(|| format!("Failed to read {:?}", self.0))?;
        Ok(Some(content))
    }
}

pub struct EnvBlob(pub String);

impl BlobSource for EnvBlob {
    fn fetch(&self) -> Result<Option<String>> {
        Ok(std::env::var(&self.0).ok().filter(|v| !v.trim().is_empty()))
    }
}

impl BlobConfig {
    pub fn inline(json: impl Into<String>) -> Self {
        Self {
            inline: Some(json.into()),
            ..Self::default()
        }
    }

    /// Inline wins over path, path wins over env.
    pub fn to_source(&self) -> Arc<dyn BlobSource> {
        if let Some(inline) = &self.inline {
            return Arc::new(StaticBlob(Some(inline.clone())));
        }
        if let Some(path) = &self.path {
            return Arc::new(FileBlob(resolve_path(path)));
        }
        if let Some(var) = &self.env {
            return Arc::new(EnvBlob(var.clone()));
        }
        Arc::new(StaticBlob(None))
    }
}

pub fn resolve_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

pub fn load(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        tracing::info!("No config at {:?}, using defaults", path);
        return Ok(AppConfig::default());
    }

    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let config: AppConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;

    tracing::info!("Config loaded from {:?}", path);
    Ok(config)
}

/// Config path from the first CLI argument, then `GATEWAY_CONFIG`.
pub fn config_path_from_env() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEWAY_CONFIG").ok())
        .map(|p| resolve_path(&p))
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}
