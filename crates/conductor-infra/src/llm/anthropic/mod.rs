//! Anthropic Claude text generation client.

pub mod client;
pub mod types;

pub use client::AnthropicClient;
