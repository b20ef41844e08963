//! Route handlers grouped by resource.

pub mod breaker;
pub mod event;
pub mod health;
pub mod run;
pub mod stats;
pub mod workflow;
