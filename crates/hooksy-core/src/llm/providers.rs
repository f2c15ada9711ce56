//! Concrete `LlmProvider` backends and the config-driven factory that builds
//! the fallback chain the manager dispatches through.

pub mod anthropic;
pub mod huggingface;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::llm::provider::LlmProvider;
use crate::llm::ProviderConfig;
use anthropic::AnthropicProvider;
use huggingface::HuggingFaceProvider;
use openai::OpenAiProvider;

/// Build the provider fallback chain from configuration, in the configured
/// order. A provider whose `api_key_env` isn't set in the environment is
/// skipped with a warning rather than constructed with an empty key, since
/// an empty key would only fail noisily on the first real call.
pub fn build_providers(configs: &[ProviderConfig]) -> Vec<Arc<dyn LlmProvider>> {
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
    for cfg in configs {
        let api_key = if cfg.api_key_env.is_empty() {
            String::new()
        } else {
            match std::env::var(&cfg.api_key_env) {
                Ok(key) if !key.is_empty() => key,
                _ => {
                    warn!(
                        provider = cfg.name.as_str(),
                        env_var = cfg.api_key_env.as_str(),
                        "api key env var not set, skipping provider"
                    );
                    continue;
                }
            }
        };
        let timeout = Duration::from_secs(cfg.timeout_seconds);

        let provider: Arc<dyn LlmProvider> = match cfg.kind.as_str() {
            "anthropic" => {
                let mut p = AnthropicProvider::new(api_key, cfg.model.clone(), timeout);
                if !cfg.base_url.is_empty() {
                    p = p.with_base_url(cfg.base_url.clone());
                }
                Arc::new(p)
            }
            "openai" => {
                let mut p = OpenAiProvider::new(api_key, cfg.model.clone(), timeout);
                if !cfg.base_url.is_empty() {
                    p = p.with_base_url(cfg.base_url.clone());
                }
                Arc::new(p)
            }
            "huggingface" => {
                let mut p = HuggingFaceProvider::new(api_key, cfg.model.clone(), timeout);
                if !cfg.base_url.is_empty() {
                    p = p.with_base_url(cfg.base_url.clone());
                }
                Arc::new(p)
            }
            other => {
                warn!(provider = cfg.name.as_str(), kind = other, "unknown provider kind, skipping");
                continue;
            }
        };
        providers.push(provider);
    }
    providers
}
