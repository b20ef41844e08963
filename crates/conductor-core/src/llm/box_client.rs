//! BoxLlmClient: dynamic dispatch over [`LlmClient`].
//!
//! `LlmClientDyn` boxes the future and is blanket-implemented for every
//! `LlmClient`, so any client can sit in the registry behind one type.

use std::future::Future;
use std::pin::Pin;

use conductor_types::error::OrchestratorError;
use conductor_types::llm::{GenerateTextRequest, GenerateTextResponse};

use super::client::LlmClient;

type GenerateFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GenerateTextResponse, OrchestratorError>> + Send + 'a>>;

/// Object-safe mirror of [`LlmClient`].
pub trait LlmClientDyn: Send + Sync {
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    fn generate_text_boxed<'a>(
        &'a self,
        request: &'a GenerateTextRequest,
        correlation_id: &'a str,
    ) -> GenerateFuture<'a>;
}

impl<T: LlmClient> LlmClientDyn for T {
    fn name(&self) -> &str {
        LlmClient::name(self)
    }

    fn default_model(&self) -> &str {
        LlmClient::default_model(self)
    }

    fn generate_text_boxed<'a>(
        &'a self,
        request: &'a GenerateTextRequest,
        correlation_id: &'a str,
    ) -> GenerateFuture<'a> {
        Box::pin(self.generate_text(request, correlation_id))
    }
}

/// Type-erased LLM client for runtime provider selection.
pub struct BoxLlmClient {
    inner: Box<dyn LlmClientDyn>,
}

impl BoxLlmClient {
    pub fn new<T: LlmClient + 'static>(client: T) -> Self {
        Self {
            inner: Box::new(client),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    pub async fn generate_text(
        &self,
        request: &GenerateTextRequest,
        correlation_id: &str,
    ) -> Result<GenerateTextResponse, OrchestratorError> {
        self.inner.generate_text_boxed(request, correlation_id).await
    }
}

impl std::fmt::Debug for BoxLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxLlmClient")
            .field("name", &self.name())
            .finish()
    }
}
