//! Workflow engine core.
//!
//! - `definition` -- YAML/JSON parsing and structural validation
//! - `context` -- execution context helpers and template resolution
//! - `expression` -- condition tokenizer, parser and evaluator
//! - `step_runner` -- step executor contract and registry
//! - `executors` -- built-in executors for the five step types
//! - `engine` -- run queue, bounded concurrency and the step loop

pub mod context;
pub mod definition;
pub mod engine;
pub mod executors;
pub mod expression;
pub mod step_runner;

pub use engine::{EngineConfig, EngineStatistics, StartOptions, WorkflowEngine};
pub use step_runner::{BoxStepExecutor, ExecutorRegistry, StepExecutor};
