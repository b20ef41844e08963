//! Business logic for Conductor: the workflow engine, its step executors,
//! the run event log and the resilience layer.
//!
//! External systems are reached only through the [`llm::LlmClient`] and
//! [`integration::IntegrationAdapter`] traits; implementations live in
//! `conductor-infra`. This crate does no network or file I/O of its own
//! apart from loading workflow files.

pub mod event;
pub mod integration;
pub mod llm;
pub mod resilience;
pub mod workflow;
