//! Infrastructure layer for Conductor.
//!
//! Implementations of the traits defined in `conductor-core` that touch the
//! network or the filesystem: a retrying HTTP client, the Anthropic Messages
//! API client, config-driven HTTP integrations, and the `config.toml` loader.

pub mod config;
pub mod http;
pub mod integration;
pub mod llm;
