//! LLM client abstraction consumed by the `llm` step executor.
//!
//! - `client`: the RPITIT [`LlmClient`] trait
//! - `box_client`: object-safe [`BoxLlmClient`] wrapper
//! - `registry`: named clients plus a default

pub mod box_client;
pub mod client;
pub mod registry;

pub use box_client::BoxLlmClient;
pub use client::LlmClient;
pub use registry::LlmRegistry;
