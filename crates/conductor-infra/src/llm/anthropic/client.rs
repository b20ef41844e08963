//! AnthropicClient -- [`LlmClient`] implementation for the Anthropic
//! Messages API (`/v1/messages`).
//!
//! The API key is held as a [`SecretString`] and only exposed while building
//! request headers. Transport retries come from the shared [`HttpClient`];
//! failures are mapped onto the `LLM_*` error codes so the engine's breakers
//! and step retries see the right retryability.

use conductor_core::llm::LlmClient;
use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::llm::{FinishReason, GenerateTextRequest, GenerateTextResponse, TokenUsage};
use secrecy::{ExposeSecret, SecretString};

use super::types::{
    AnthropicContentBlock, AnthropicErrorBody, AnthropicMessage, AnthropicRequest,
    AnthropicResponse,
};
use crate::http::{HttpClient, HttpError, HttpRequestSpec};

/// Used when neither the request nor the step sets `maxTokens`.
const DEFAULT_MAX_TOKENS: u32 = 1_024;

pub struct AnthropicClient {
    name: String,
    http: HttpClient,
    api_key: SecretString,
    base_url: String,
    default_model: String,
}

impl AnthropicClient {
    const API_VERSION: &'static str = "2023-06-01";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    pub fn new(
        name: impl Into<String>,
        api_key: SecretString,
        default_model: impl Into<String>,
        http: HttpClient,
    ) -> Self {
        Self {
            name: name.into(),
            http,
            api_key,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            default_model: default_model.into(),
        }
    }

    /// Override the base URL (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn to_anthropic_request(&self, request: &GenerateTextRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            system: request.system_prompt.clone(),
            temperature: request.temperature,
        }
    }

    fn map_error(&self, err: HttpError, correlation_id: &str) -> OrchestratorError {
        let code = match &err {
            HttpError::Timeout(_) => ErrorCode::LlmTimeout,
            HttpError::Connect(_) => ErrorCode::LlmProviderUnavailable,
            HttpError::Status { status: 401 | 403, .. } => ErrorCode::LlmAuthFailed,
            HttpError::Status { status: 429, .. } => ErrorCode::LlmRateLimited,
            HttpError::Status { status: 400 | 413, body } if is_context_overflow(body) => {
                ErrorCode::LlmContextLengthExceeded
            }
            HttpError::Status { status, .. } if *status >= 500 => {
                ErrorCode::LlmProviderUnavailable
            }
            HttpError::Decode(_) => ErrorCode::LlmInvalidResponse,
            HttpError::Status { .. } | HttpError::Request(_) | HttpError::InvalidRequest(_) => {
                ErrorCode::LlmRequestFailed
            }
        };
        OrchestratorError::new(code, format!("{}: {}", self.name, provider_message(&err)))
            .with_resource_id(self.name.as_str())
            .with_correlation_id(correlation_id)
            .with_cause(err)
    }
}

// No Debug: keeps the struct out of debug output altogether, the key is
// already redacted by SecretString.

impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn generate_text(
        &self,
        request: &GenerateTextRequest,
        correlation_id: &str,
    ) -> Result<GenerateTextResponse, OrchestratorError> {
        let body = self.to_anthropic_request(request);
        let req = HttpRequestSpec::post(self.url("/v1/messages"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("x-correlation-id", correlation_id)
            .json(serde_json::to_value(&body)?);

        let response = self
            .http
            .send(&req)
            .await
            .map_err(|e| self.map_error(e, correlation_id))?;

        let parsed: AnthropicResponse = serde_json::from_value(response.body).map_err(|e| {
            OrchestratorError::new(
                ErrorCode::LlmInvalidResponse,
                format!("{}: unexpected response shape: {e}", self.name),
            )
            .with_resource_id(self.name.as_str())
            .with_correlation_id(correlation_id)
        })?;

        let text = parsed
            .content
            .iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text.as_str()),
                AnthropicContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        tracing::debug!(
            provider = self.name.as_str(),
            response_id = parsed.id.as_str(),
            model = parsed.model.as_str(),
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            attempts = response.attempts,
            "anthropic completion received"
        );

        Ok(GenerateTextResponse {
            text,
            usage: TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
            model: parsed.model,
            finish_reason: finish_reason(parsed.stop_reason.as_deref()),
        })
    }
}

pub(crate) fn finish_reason(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

fn is_context_overflow(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("prompt is too long")
        || lower.contains("context length")
        || lower.contains("context window")
        || lower.contains("too many tokens")
}

/// The provider's own error message when the body is an Anthropic error
/// document, otherwise the transport error.
fn provider_message(err: &HttpError) -> String {
    if let HttpError::Status { status, body } = err {
        if let Ok(parsed) = serde_json::from_str::<AnthropicErrorBody>(body) {
            return format!("HTTP {status} {}: {}", parsed.error.kind, parsed.error.message);
        }
    }
    err.to_string()
}
