// src/provider/resolver.rs — Pick the classification provider from config + environment

use std::sync::Arc;
use std::time::Duration;

use super::anthropic::AnthropicVision;
use super::openai::OpenAiVision;
use super::VisionProvider;
use crate::infra::config::AnalysisConfig;

/// Resolve the configured provider. `None` means the collaborator is
/// unavailable and every analysis will come back degraded.
pub fn resolve_provider(config: &AnalysisConfig) -> Option<Arc<dyn VisionProvider>> {
    resolve_with(config, |var| std::env::var(var).ok())
}

fn resolve_with(
    config: &AnalysisConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Option<Arc<dyn VisionProvider>> {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to build HTTP client: {}", e);
            return None;
        }
    };

    let anthropic = || {
        env("ANTHROPIC_API_KEY")
            .filter(|k| !k.is_empty())
            .map(|k| Arc::new(AnthropicVision::new(k, client.clone())) as Arc<dyn VisionProvider>)
    };
    let openai = || {
        env("OPENAI_API_KEY")
            .filter(|k| !k.is_empty())
            .map(|k| Arc::new(OpenAiVision::new(k, client.clone())) as Arc<dyn VisionProvider>)
    };

    let provider = match config.provider.as_str() {
        "anthropic" => anthropic(),
        "openai" => openai(),
        "auto" => anthropic().or_else(openai),
        other => {
            tracing::warn!(provider = other, "Unknown analysis provider in config");
            None
        }
    };

    match &provider {
        Some(p) => tracing::info!(provider = p.id(), "Classification provider resolved"),
        None => tracing::warn!("No classification provider available; analysis will run degraded"),
    }
    provider
}
