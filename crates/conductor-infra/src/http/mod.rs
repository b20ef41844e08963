//! Shared HTTP plumbing for providers and integrations.

pub mod client;

pub use client::{HttpClient, HttpError, HttpRequestSpec, HttpResponse};
