//! LlmClient trait definition.
//!
//! Uses RPITIT for `generate_text`; see [`BoxLlmClient`](super::BoxLlmClient)
//! for the object-safe wrapper used by the registry.

use std::future::Future;

use conductor_types::error::OrchestratorError;
use conductor_types::llm::{GenerateTextRequest, GenerateTextResponse};

/// Text generation backend (Anthropic, test fakes, ...).
///
/// Failures are returned already normalized, with the retryable flag set from
/// the error code table so breakers and retry loops can act on them.
/// Implementations live in conductor-infra.
pub trait LlmClient: Send + Sync {
    /// Provider name used for breaker keys and span attributes.
    fn name(&self) -> &str;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    fn generate_text(
        &self,
        request: &GenerateTextRequest,
        correlation_id: &str,
    ) -> impl Future<Output = Result<GenerateTextResponse, OrchestratorError>> + Send;
}
