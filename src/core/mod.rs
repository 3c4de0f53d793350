//! Core domain models for task-graph execution.
//!
//! This module contains the task records, the validated dependency graph
//! and the run-scoped execution context.

pub mod context;
pub mod dag;
pub mod task;

pub use context::{ExecutionContext, INITIAL_INPUT_KEY};
pub use dag::TaskGraph;
pub use task::{Task, TaskDef, TaskStatus};
