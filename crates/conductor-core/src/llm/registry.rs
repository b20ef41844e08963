//! Name-indexed registry of LLM clients with an optional default.

use std::collections::HashMap;

use conductor_types::error::{ErrorCode, OrchestratorError};

use super::box_client::BoxLlmClient;

#[derive(Debug, Default)]
pub struct LlmRegistry {
    clients: HashMap<String, BoxLlmClient>,
    default: Option<String>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its own name, replacing any previous one.
    /// The first client registered becomes the default.
    pub fn register(&mut self, client: BoxLlmClient) {
        let name = client.name().to_string();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.clients.insert(name, client);
    }

    /// Returns false when no client has that name.
    pub fn set_default(&mut self, name: &str) -> bool {
        if self.clients.contains_key(name) {
            self.default = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn get(&self, name: &str) -> Option<&BoxLlmClient> {
        self.clients.get(name)
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// The named client, or the default when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<&BoxLlmClient, OrchestratorError> {
        let wanted = name.or(self.default.as_deref()).ok_or_else(|| {
            OrchestratorError::new(
                ErrorCode::LlmProviderNotFound,
                "no LLM provider named and no default configured",
            )
        })?;
        self.clients.get(wanted).ok_or_else(|| {
            OrchestratorError::new(
                ErrorCode::LlmProviderNotFound,
                format!("LLM provider '{wanted}' is not registered"),
            )
            .with_resource_id(wanted)
        })
    }

    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;
    use conductor_types::llm::{FinishReason, GenerateTextRequest, GenerateTextResponse, TokenUsage};

    struct Echo(&'static str);

    impl LlmClient for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn default_model(&self) -> &str {
            "echo-1"
        }

        async fn generate_text(
            &self,
            request: &GenerateTextRequest,
            _correlation_id: &str,
        ) -> Result<GenerateTextResponse, OrchestratorError> {
            Ok(GenerateTextResponse {
                text: request.prompt.clone(),
                usage: TokenUsage::new(1, 1),
                model: "echo-1".into(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn test_first_registered_is_default() {
        let mut registry = LlmRegistry::new();
        registry.register(BoxLlmClient::new(Echo("a")));
        registry.register(BoxLlmClient::new(Echo("b")));

        assert_eq!(registry.default_name(), Some("a"));
        let client = registry.resolve(None).unwrap();
        let out = client
            .generate_text(&GenerateTextRequest::new("hi"), "c1")
            .await
            .unwrap();
        assert_eq!(out.text, "hi");
        assert_eq!(registry.list_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let mut registry = LlmRegistry::new();
        let err = registry.resolve(None).unwrap_err();
        assert_eq!(err.code, ErrorCode::LlmProviderNotFound);

        registry.register(BoxLlmClient::new(Echo("a")));
        assert!(!registry.set_default("missing"));
        let err = registry.resolve(Some("missing")).unwrap_err();
        assert_eq!(err.code, ErrorCode::LlmProviderNotFound);
    }
}
