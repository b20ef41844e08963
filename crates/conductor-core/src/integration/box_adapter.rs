//! BoxIntegrationAdapter: dynamic dispatch over [`IntegrationAdapter`].

use std::future::Future;
use std::pin::Pin;

use conductor_types::context::ExecutionContext;
use conductor_types::integration::IntegrationResult;
use serde_json::Value;

use super::adapter::IntegrationAdapter;

/// Object-safe mirror of [`IntegrationAdapter`].
pub trait IntegrationAdapterDyn: Send + Sync {
    fn id(&self) -> &str;

    fn operations(&self) -> Vec<String>;

    fn execute_operation_boxed<'a>(
        &'a self,
        operation: &'a str,
        parameters: &'a Value,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = IntegrationResult> + Send + 'a>>;
}

impl<T: IntegrationAdapter> IntegrationAdapterDyn for T {
    fn id(&self) -> &str {
        IntegrationAdapter::id(self)
    }

    fn operations(&self) -> Vec<String> {
        IntegrationAdapter::operations(self)
    }

    fn execute_operation_boxed<'a>(
        &'a self,
        operation: &'a str,
        parameters: &'a Value,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = IntegrationResult> + Send + 'a>> {
        Box::pin(self.execute_operation(operation, parameters, ctx))
    }
}

pub struct BoxIntegrationAdapter {
    inner: Box<dyn IntegrationAdapterDyn>,
}

impl BoxIntegrationAdapter {
    pub fn new<T: IntegrationAdapter + 'static>(adapter: T) -> Self {
        Self {
            inner: Box::new(adapter),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn operations(&self) -> Vec<String> {
        self.inner.operations()
    }

    pub async fn execute_operation(
        &self,
        operation: &str,
        parameters: &Value,
        ctx: &ExecutionContext,
    ) -> IntegrationResult {
        self.inner
            .execute_operation_boxed(operation, parameters, ctx)
            .await
    }
}

impl std::fmt::Debug for BoxIntegrationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxIntegrationAdapter")
            .field("id", &self.id())
            .finish()
    }
}
