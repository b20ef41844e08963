//! Integration adapter abstraction consumed by the `integration` step executor.

pub mod adapter;
pub mod box_adapter;
pub mod registry;

pub use adapter::IntegrationAdapter;
pub use box_adapter::BoxIntegrationAdapter;
pub use registry::IntegrationRegistry;
