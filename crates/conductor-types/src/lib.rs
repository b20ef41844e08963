//! Shared domain types for Conductor.
//!
//! Workflow definitions, runs, execution context, run events, the unified
//! error taxonomy, LLM and integration envelopes, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod integration;
pub mod llm;
pub mod workflow;
