//! Build providers from configuration.
//!
//! Every provider returned here is already wrapped in its retry policy.

use advisor_config::AppConfig;
use advisor_core::error::ProviderError;
use advisor_core::provider::{EmbeddingProvider, GenerativeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::hash_embedder::HashEmbedder;
use crate::openai_compat::{OpenAiCompatEmbedder, OpenAiCompatProvider};
use crate::retry::{RetryPolicy, RetryingEmbedder, RetryingGenerator};

/// Resolve the base URL for a named provider. An explicit URL always wins.
pub fn resolve_base_url(provider: &str, api_url: Option<&str>) -> Result<String, ProviderError> {
    if let Some(url) = api_url {
        return Ok(url.to_string());
    }
    match provider {
        "openai" => Ok("https://api.openai.com/v1".into()),
        "openrouter" => Ok("https://openrouter.ai/api/v1".into()),
        "ollama" => Ok("http://localhost:11434/v1".into()),
        "custom" => Err(ProviderError::NotConfigured(
            "provider 'custom' requires api_url".into(),
        )),
        other => Err(ProviderError::NotConfigured(format!("unknown provider '{other}'"))),
    }
}

fn http_provider(
    provider: &str,
    api_url: Option<&str>,
    api_key: Option<&str>,
    timeout_secs: u64,
) -> Result<OpenAiCompatProvider, ProviderError> {
    let base_url = resolve_base_url(provider, api_url)?;
    let key = match (provider, api_key) {
        (_, Some(key)) => key.to_string(),
        // Local servers don't need a real key
        ("ollama" | "custom", None) => provider.to_string(),
        (_, None) => {
            return Err(ProviderError::NotConfigured(format!(
                "provider '{provider}' requires an API key"
            )));
        }
    };
    OpenAiCompatProvider::new(provider, base_url, key, Duration::from_secs(timeout_secs.max(1)))
}

/// The configured embedding provider.
pub fn build_embedder(config: &AppConfig) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
    let e = &config.embedding;
    let inner: Arc<dyn EmbeddingProvider> = match e.provider.as_str() {
        "hash" => Arc::new(HashEmbedder::new(&e.model, e.dimensions)),
        name => {
            let http = http_provider(name, e.api_url.as_deref(), config.embedding_api_key(), e.timeout_secs)?;
            Arc::new(OpenAiCompatEmbedder::new(http, &e.model, e.dimensions))
        }
    };
    info!(provider = %e.provider, model = %e.model, dimensions = e.dimensions, "Embedding provider ready");
    Ok(Arc::new(RetryingEmbedder::new(
        inner,
        RetryPolicy::from_config(&e.retry, e.timeout_secs),
    )))
}

/// The configured generative provider.
pub fn build_generator(config: &AppConfig) -> Result<Arc<dyn GenerativeProvider>, ProviderError> {
    let g = &config.generation;
    let http = http_provider(&g.provider, g.api_url.as_deref(), config.generation_api_key(), g.timeout_secs)?;
    info!(provider = %g.provider, model = %g.model, "Generation provider ready");
    Ok(Arc::new(RetryingGenerator::new(
        Arc::new(http),
        RetryPolicy::from_config(&g.retry, g.timeout_secs),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_resolve() {
        assert!(resolve_base_url("openai", None).unwrap().contains("api.openai.com"));
        assert!(resolve_base_url("openrouter", None).unwrap().contains("openrouter.ai"));
        assert!(resolve_base_url("ollama", None).unwrap().contains("11434"));
        assert_eq!(
            resolve_base_url("openai", Some("http://proxy/v1")).unwrap(),
            "http://proxy/v1"
        );
        assert!(resolve_base_url("custom", None).is_err());
        assert!(resolve_base_url("nope", None).is_err());
    }

    #[test]
    fn default_config_builds_offline_embedder() {
        let config = AppConfig::default();
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.model_id(), "hash-v1");
        assert_eq!(embedder.dimensions(), 384);
    }

    #[test]
    fn ollama_generator_needs_no_key() {
        let config = AppConfig::default();
        assert_eq!(build_generator(&config).unwrap().name(), "ollama");
    }

    #[test]
    fn openai_generator_requires_key() {
        let mut config = AppConfig::default();
        config.generation.provider = "openai".into();
        assert!(matches!(build_generator(&config), Err(ProviderError::NotConfigured(_))));

        config.api_key = Some("sk-test".into());
        assert!(build_generator(&config).is_ok());
    }
}
