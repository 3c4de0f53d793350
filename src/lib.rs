//! mimi: a task-graph execution engine for teams of agents.
//!
//! A project names agents and tasks. Tasks depend on each other, read their
//! input from a shared execution context and write their output back to it.
//! The runner executes the validated graph wave by wave.

pub mod agent;
pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod project;
pub mod util;

use std::sync::Arc;

use serde_json::Value;

pub use agent::{AgentOutput, AgentSet, Dispatch};
pub use backend::InferenceBackend;
pub use error::{AgentError, ConfigError, Error, Result};
pub use orchestration::{Journal, RunResult, RunStatus, Runner, RunnerConfig};
pub use project::{AgentDef, Project, ValidatedProject};

/// Run a validated project with the built-in agents and default settings.
pub async fn run(
    project: &ValidatedProject,
    backend: Arc<dyn InferenceBackend>,
    initial_input: Value,
) -> RunResult {
    let agents = AgentSet::from_project(project, backend);
    Runner::for_project(project, agents, RunnerConfig::default())
        .run(initial_input)
        .await
}
