//! IntegrationAdapter trait definition.

use std::future::Future;

use conductor_types::context::ExecutionContext;
use conductor_types::integration::IntegrationResult;
use serde_json::Value;

/// A named external system exposing operations.
///
/// Adapters report failure through the [`IntegrationResult`] envelope rather
/// than an `Err`, so orchestration code can branch on `error.retryable`.
pub trait IntegrationAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Operation names this adapter accepts.
    fn operations(&self) -> Vec<String>;

    fn execute_operation(
        &self,
        operation: &str,
        parameters: &Value,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = IntegrationResult> + Send;
}
