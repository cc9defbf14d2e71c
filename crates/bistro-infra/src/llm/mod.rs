//! LLM provider implementations.
//!
//! Contains the concrete implementation of the [`LlmProvider`] trait
//! defined in `bistro-core` (Anthropic Claude) and the factory that
//! builds it from the `[model]` config section.
//!
//! [`LlmProvider`]: bistro_core::llm::provider::LlmProvider

pub mod anthropic;

use secrecy::SecretString;

use bistro_core::llm::box_provider::BoxLlmProvider;
use bistro_types::config::ModelConfig;
use bistro_types::llm::LlmError;

use self::anthropic::AnthropicProvider;

/// Read the API key named by `config.api_key_env`.
pub fn resolve_api_key(config: &ModelConfig) -> Option<SecretString> {
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from)
}

/// Create a [`BoxLlmProvider`] from the `[model]` section.
///
/// # Errors
///
/// `AuthenticationFailed` when no API key is available, `InvalidRequest`
/// for an unknown provider name.
pub fn create_provider(
    config: &ModelConfig,
    api_key: Option<SecretString>,
) -> Result<BoxLlmProvider, LlmError> {
    match config.provider.as_str() {
        "anthropic" => {
            let key = api_key.ok_or(LlmError::AuthenticationFailed)?;
            let mut provider = AnthropicProvider::new(key, config.model.clone())?;
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            tracing::debug!(model = %config.model, "created anthropic provider");
            Ok(BoxLlmProvider::new(provider))
        }
        other => Err(LlmError::InvalidRequest(format!(
            "unsupported model provider '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_anthropic() {
        let config = ModelConfig::default();
        let provider = create_provider(&config, Some(SecretString::from("sk-test-key"))).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn test_create_provider_missing_key() {
        let result = create_provider(&ModelConfig::default(), None);
        assert!(matches!(result, Err(LlmError::AuthenticationFailed)));
    }

    #[test]
    fn test_create_provider_unknown_name() {
        let config = ModelConfig {
            provider: "carrier-pigeon".to_string(),
            ..ModelConfig::default()
        };
        match create_provider(&config, Some(SecretString::from("k"))) {
            Err(LlmError::InvalidRequest(message)) => assert!(message.contains("carrier-pigeon")),
            Err(other) => panic!("expected InvalidRequest, got: {other}"),
            Ok(_) => panic!("expected error but got Ok"),
        }
    }

    #[test]
    fn test_resolve_api_key_missing_variable() {
        let config = ModelConfig {
            api_key_env: "BISTRO_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ModelConfig::default()
        };
        assert!(resolve_api_key(&config).is_none());
    }
}
