//! Factory for creating LLM providers from configuration

use std::sync::Arc;

use crate::config::{AgentflowConfig, LLMProviderConfig, LLMProviderKind};
use crate::error::{AgentflowError, Result};
use crate::llm::LLMProvider;
use crate::llm::retry::{RetryConfig, RetryingProvider};

#[cfg(feature = "llm-openai")]
use crate::llm::providers::openai::OpenAIProvider;

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be created (e.g., missing API key)
    pub fn create(config: &LLMProviderConfig) -> Result<Arc<dyn LLMProvider>> {
        match config.provider {
            #[cfg(feature = "llm-openai")]
            LLMProviderKind::OpenAI => {
                let provider = Self::openai(config, std::env::var("OPENAI_API_KEY").ok())?;
                Ok(Arc::new(Self::finish(provider, config)?))
            }

            #[cfg(feature = "llm-openai")]
            LLMProviderKind::Ollama => {
                let model = if config.model.is_empty() {
                    "llama3.2".to_string()
                } else {
                    config.model.clone()
                };
                let provider = OpenAIProvider::ollama(model, config.base_url.clone());

                Ok(Arc::new(Self::finish(provider, config)?))
            }

            #[cfg(not(feature = "llm-openai"))]
            _ => Err(AgentflowError::Configuration(
                "HTTP providers require the 'llm-openai' feature".to_string(),
            )),
        }
    }

    /// Create the configured provider, wrapped in a retrying decorator when
    /// `retry.enabled` is set
    pub fn from_config(config: &AgentflowConfig) -> Result<Arc<dyn LLMProvider>> {
        let provider = Self::create(&config.llm)?;

        if config.retry.enabled {
            tracing::debug!(
                max_attempts = config.retry.max_attempts,
                "Wrapping provider with transport retries"
            );
            return Ok(Arc::new(RetryingProvider::new(
                provider,
                RetryConfig::from(&config.retry),
            )));
        }

        Ok(provider)
    }

    /// Configured values win over the `OPENAI_*` environment
    #[cfg(feature = "llm-openai")]
    fn openai(config: &LLMProviderConfig, env_api_key: Option<String>) -> Result<OpenAIProvider> {
        let api_key = config.api_key.clone().or(env_api_key).ok_or_else(|| {
            AgentflowError::Configuration(
                "No API key: set llm.api_key or OPENAI_API_KEY".to_string(),
            )
        })?;

        let model = if config.model.is_empty() {
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string())
        } else {
            config.model.clone()
        };

        Ok(match config
            .base_url
            .clone()
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
        {
            Some(base_url) => OpenAIProvider::with_base_url(api_key, model, base_url),
            None => OpenAIProvider::new(api_key, model),
        })
    }

    #[cfg(feature = "llm-openai")]
    fn finish(provider: OpenAIProvider, config: &LLMProviderConfig) -> Result<OpenAIProvider> {
        Ok(provider
            .with_generation_defaults(config.temperature, config.max_tokens)
            .with_timeout(config.request_timeout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_openai_with_key() {
        let config = LLMProviderConfig {
            api_key: Some("sk-test".to_string()),
            model: "gpt-4o".to_string(),
            ..Default::default()
        };

        let provider = LLMProviderFactory::create(&config).unwrap();
        let info = provider.model_info();
        assert_eq!(info.provider, "openai");
        assert_eq!(info.model_name, "gpt-4o");
    }

    #[test]
    fn test_base_url_kept_with_key_from_env() {
        let config = LLMProviderConfig {
            base_url: Some("http://gateway/v1/".to_string()),
            ..Default::default()
        };

        let provider = LLMProviderFactory::openai(&config, Some("sk-env".to_string())).unwrap();
        assert_eq!(provider.base_url(), "http://gateway/v1");
    }

    #[test]
    fn test_configured_key_wins_over_env() {
        let config = LLMProviderConfig {
            api_key: Some("sk-config".to_string()),
            model: "gpt-4o".to_string(),
            ..Default::default()
        };

        let provider = LLMProviderFactory::openai(&config, Some("sk-env".to_string())).unwrap();
        assert_eq!(provider.model(), "gpt-4o");
        assert!(LLMProviderFactory::openai(&LLMProviderConfig::default(), None).is_err());
    }

    #[test]
    fn test_create_ollama_without_key() {
        let config = LLMProviderConfig {
            provider: LLMProviderKind::Ollama,
            model: String::new(),
            ..Default::default()
        };

        let provider = LLMProviderFactory::create(&config).unwrap();
        assert_eq!(provider.model_info().provider, "ollama");
        assert_eq!(provider.model_info().model_name, "llama3.2");
    }

    #[test]
    fn test_from_config_with_retries_keeps_model_info() {
        let mut config = AgentflowConfig::default();
        config.llm.api_key = Some("sk-test".to_string());
        config.retry.enabled = true;

        let provider = LLMProviderFactory::from_config(&config).unwrap();
        assert_eq!(provider.model_info().model_name, "gpt-4o-mini");
    }
}
