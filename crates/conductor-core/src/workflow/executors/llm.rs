//! `llm` steps: prompt a registered LLM client through its circuit breaker.

use std::sync::Arc;

use conductor_observe::genai_attrs;
use conductor_types::context::ExecutionContext;
use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::llm::GenerateTextRequest;
use conductor_types::workflow::{StepType, WorkflowStep};
use serde_json::Value;
use tracing::Instrument;

use crate::llm::LlmRegistry;
use crate::resilience::CircuitBreakerManager;
use crate::workflow::step_runner::{input_opt_str, input_str, StepExecutor};

pub struct LlmStepExecutor {
    llms: Arc<LlmRegistry>,
    breakers: Arc<CircuitBreakerManager>,
}

impl LlmStepExecutor {
    pub fn new(llms: Arc<LlmRegistry>, breakers: Arc<CircuitBreakerManager>) -> Self {
        Self { llms, breakers }
    }
}

impl StepExecutor for LlmStepExecutor {
    fn step_type(&self) -> StepType {
        StepType::Llm
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, OrchestratorError> {
        let prompt = input_str(&input, "prompt", "");
        if prompt.trim().is_empty() {
            return Err(OrchestratorError::new(
                ErrorCode::ValidationInvalidInput,
                format!("llm step '{}' resolved to an empty prompt", step.id),
            ));
        }

        let provider = input_opt_str(&input, "provider");
        let client = self.llms.resolve(provider.as_deref())?;

        let request = GenerateTextRequest {
            prompt,
            system_prompt: input_opt_str(&input, "systemPrompt"),
            model: input_opt_str(&input, "model"),
            max_tokens: input
                .get("maxTokens")
                .and_then(Value::as_u64)
                .map(|n| n.min(u32::MAX as u64) as u32),
            temperature: input.get("temperature").and_then(Value::as_f64),
        };
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| client.default_model().to_string());

        let span = tracing::info_span!(
            "gen_ai.generate_text",
            gen_ai.operation.name = genai_attrs::OP_TEXT_COMPLETION,
            gen_ai.provider.name = client.name(),
            gen_ai.request.model = %model,
            gen_ai.request.max_tokens = ?request.max_tokens,
            gen_ai.response.model = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            step_id = %step.id,
            correlation_id = %ctx.correlation_id,
        );

        let breaker = format!("llm.{}", client.name());
        let response = self
            .breakers
            .execute(&breaker, || {
                client.generate_text(&request, &ctx.correlation_id)
            })
            .instrument(span.clone())
            .await?;

        let finish_reason = response.finish_reason.to_string();
        span.record(genai_attrs::GEN_AI_RESPONSE_MODEL, response.model.as_str());
        span.record(genai_attrs::GEN_AI_RESPONSE_FINISH_REASONS, finish_reason.as_str());
        span.record(genai_attrs::GEN_AI_USAGE_INPUT_TOKENS, response.usage.prompt_tokens);
        span.record(genai_attrs::GEN_AI_USAGE_OUTPUT_TOKENS, response.usage.completion_tokens);

        Ok(serde_json::to_value(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{BoxLlmClient, LlmClient};
    use crate::resilience::CircuitBreakerConfig;
    use crate::workflow::executors::tests::step;
    use conductor_types::llm::{FinishReason, GenerateTextResponse, TokenUsage};
    use conductor_types::workflow::StepKind;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Collects every field recorded on `gen_ai.generate_text` spans.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<HashMap<String, String>>>);

    struct Sink<'a>(&'a mut HashMap<String, String>);

    impl Visit for Sink<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_string(), value.to_string());
        }

        fn record_u64(&mut self, field: &Field, value: u64) {
            self.0.insert(field.name().to_string(), value.to_string());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for SpanFields {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            if attrs.metadata().name() == "gen_ai.generate_text" {
                attrs.record(&mut Sink(&mut self.0.lock().unwrap()));
            }
        }

        fn on_record(&self, _id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
            values.record(&mut Sink(&mut self.0.lock().unwrap()));
        }
    }

    struct Fake {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    impl LlmClient for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        fn default_model(&self) -> &str {
            "fake-1"
        }

        async fn generate_text(
            &self,
            request: &GenerateTextRequest,
            _correlation_id: &str,
        ) -> Result<GenerateTextResponse, OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OrchestratorError::new(ErrorCode::LlmProviderUnavailable, "overloaded"));
            }
            Ok(GenerateTextResponse {
                text: format!("echo: {}", request.prompt),
                usage: TokenUsage::new(3, 2),
                model: request.model.clone().unwrap_or_else(|| "fake-1".into()),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn executor(fail: bool, threshold: u32) -> (LlmStepExecutor, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let mut llms = LlmRegistry::new();
        llms.register(BoxLlmClient::new(Fake {
            calls: calls.clone(),
            fail,
        }));
        let breakers = CircuitBreakerManager::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(10),
        });
        (
            LlmStepExecutor::new(Arc::new(llms), Arc::new(breakers)),
            calls,
        )
    }

    fn llm_step() -> WorkflowStep {
        step(
            "S1",
            StepKind::Llm {
                prompt: "unused".into(),
                system_prompt: None,
                provider: None,
                model: None,
                max_tokens: None,
                temperature: None,
            },
        )
    }

    #[tokio::test]
    async fn test_generates_with_resolved_prompt() {
        let (exec, calls) = executor(false, 5);
        let out = exec
            .execute(
                &llm_step(),
                json!({ "prompt": "hello", "maxTokens": 64 }),
                &ExecutionContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(out["text"], "echo: hello");
        assert_eq!(out["usage"]["totalTokens"], 5);
        assert_eq!(out["finishReason"], "stop");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected_without_call() {
        let (exec, calls) = executor(false, 5);
        let err = exec
            .execute(&llm_step(), json!({ "prompt": " " }), &ExecutionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidInput);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits() {
        let (exec, calls) = executor(true, 1);
        let ctx = ExecutionContext::default();

        let first = exec
            .execute(&llm_step(), json!({ "prompt": "a" }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(first.code, ErrorCode::LlmProviderUnavailable);

        let second = exec
            .execute(&llm_step(), json!({ "prompt": "a" }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(second.code, ErrorCode::ResilienceCircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let (exec, _) = executor(false, 5);
        let err = exec
            .execute(
                &llm_step(),
                json!({ "prompt": "a", "provider": "nope" }),
                &ExecutionContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::LlmProviderNotFound);
    }

    #[tokio::test]
    async fn test_span_records_genai_response_attributes() {
        let fields = SpanFields::default();
        let subscriber = tracing_subscriber::registry().with(fields.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let (exec, _) = executor(false, 5);
        exec.execute(
            &llm_step(),
            json!({ "prompt": "hello", "model": "fake-2" }),
            &ExecutionContext::default(),
        )
        .await
        .unwrap();

        let recorded = fields.0.lock().unwrap();
        assert_eq!(recorded["gen_ai.operation.name"], genai_attrs::OP_TEXT_COMPLETION);
        assert_eq!(recorded[genai_attrs::GEN_AI_RESPONSE_MODEL], "fake-2");
        assert_eq!(recorded[genai_attrs::GEN_AI_RESPONSE_FINISH_REASONS], "stop");
        assert_eq!(recorded[genai_attrs::GEN_AI_USAGE_INPUT_TOKENS], "3");
        assert_eq!(recorded[genai_attrs::GEN_AI_USAGE_OUTPUT_TOKENS], "2");
    }
}
