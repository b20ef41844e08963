//! Registry of integration adapters keyed by integration id.

use std::collections::HashMap;

use conductor_types::error::{ErrorCode, OrchestratorError};

use super::box_adapter::BoxIntegrationAdapter;

#[derive(Debug, Default)]
pub struct IntegrationRegistry {
    adapters: HashMap<String, BoxIntegrationAdapter>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its id. An existing adapter with the same id
    /// is replaced.
    pub fn register(&mut self, adapter: BoxIntegrationAdapter) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, id: &str) -> Option<&BoxIntegrationAdapter> {
        self.adapters.get(id)
    }

    pub fn resolve(&self, id: &str) -> Result<&BoxIntegrationAdapter, OrchestratorError> {
        self.adapters.get(id).ok_or_else(|| {
            OrchestratorError::new(
                ErrorCode::IntegrationNotFound,
                format!("integration '{id}' is not registered"),
            )
            .with_resource_id(id)
        })
    }

    pub fn list_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.adapters.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
