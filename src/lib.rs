// Antigravity Gateway - OpenAI, Claude and Gemini front ends over one upstream

pub mod api;
pub mod auth;
pub mod config;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = config::config_path_from_env();
    let config = config::load(&path)?;

    tracing::info!("Starting API server...");
    api::start_server(config).await
}
