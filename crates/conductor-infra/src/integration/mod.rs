//! Integration adapters backed by configuration.

pub mod http;

use conductor_core::integration::{BoxIntegrationAdapter, IntegrationRegistry};
use conductor_types::config::IntegrationConfig;

pub use self::http::HttpIntegration;
use crate::http::HttpClient;

/// One [`HttpIntegration`] per `[[integrations]]` entry.
pub fn build_integration_registry(configs: &[IntegrationConfig], http: &HttpClient) -> IntegrationRegistry {
    let mut registry = IntegrationRegistry::new();
    for config in configs {
        let adapter = HttpIntegration::from_config(config.clone(), http.clone());
        tracing::debug!(
            integration_id = config.id.as_str(),
            operations = config.operations.len(),
            "integration registered"
        );
        registry.register(BoxIntegrationAdapter::new(adapter));
    }
    registry
}
