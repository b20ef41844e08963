//! LLM provider implementations and the registry factory.

pub mod anthropic;

use conductor_core::llm::{BoxLlmClient, LlmRegistry};
use conductor_types::config::{LlmProviderConfig, LlmProviderKind};
use secrecy::SecretString;

use self::anthropic::AnthropicClient;
use crate::config::{secret_from_env, ConfigError};
use crate::http::HttpClient;

/// Build a client for one configured provider.
pub fn create_llm_client(
    config: &LlmProviderConfig,
    api_key: SecretString,
    http: &HttpClient,
) -> BoxLlmClient {
    match config.kind {
        LlmProviderKind::Anthropic => {
            let mut client = AnthropicClient::new(
                config.name.as_str(),
                api_key,
                config.default_model.as_str(),
                http.clone(),
            );
            if let Some(base_url) = &config.base_url {
                client = client.with_base_url(base_url.as_str());
            }
            BoxLlmClient::new(client)
        }
    }
}

/// Register every configured provider whose API key is available.
///
/// Providers with a missing key are skipped with a warning so workflows
/// without `llm` steps still run. The provider flagged `default` wins the
/// default slot; otherwise the first registered one does.
pub fn build_llm_registry(configs: &[LlmProviderConfig], http: &HttpClient) -> LlmRegistry {
    let mut registry = LlmRegistry::new();
    let mut preferred = None;

    for config in configs {
        let api_key = match secret_from_env(&config.api_key_env) {
            Ok(key) => key,
            Err(ConfigError::MissingEnv(var)) => {
                tracing::warn!(
                    provider = config.name.as_str(),
                    env = var.as_str(),
                    "LLM provider skipped: API key variable not set"
                );
                continue;
            }
            Err(e) => {
                tracing::warn!(provider = config.name.as_str(), error = %e, "LLM provider skipped");
                continue;
            }
        };
        registry.register(create_llm_client(config, api_key, http));
        if config.default {
            preferred = Some(config.name.clone());
        }
        tracing::debug!(provider = config.name.as_str(), model = config.default_model.as_str(), "LLM provider registered");
    }

    if let Some(name) = preferred {
        registry.set_default(&name);
    }
    registry
}
