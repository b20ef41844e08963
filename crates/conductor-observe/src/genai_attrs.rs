//! OpenTelemetry GenAI semantic-convention attribute names.
//!
//! `tracing` span macros need literal field names, so attributes known when
//! the span opens are spelled inline. Attributes learned from the provider
//! response are recorded afterwards through these constants.

// --- Operation name values ---

/// Single-shot text generation, as issued by `llm` workflow steps.
pub const OP_TEXT_COMPLETION: &str = "text_completion";

// --- Response attributes ---

/// Model that actually served the request.
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";

/// Finish reasons reported by the provider (e.g. "stop", "length").
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";

pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
