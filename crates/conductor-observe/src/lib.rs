//! Observability setup for Conductor: tracing subscriber initialization and
//! GenAI semantic-convention attribute names for LLM spans.

pub mod genai_attrs;
pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing, LogFormat};
