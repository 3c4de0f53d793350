use std::time::Duration;

use thiserror::Error;

/// Crate-level error returned by configuration loading and the CLI.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Unsupported project file format: {0}")]
    UnsupportedFormat(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A project definition that cannot be executed.
///
/// Raised before any agent runs; a run never starts with a bad graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("task '{task}' depends on non-existent task '{missing}'")]
    DanglingDependency { task: String, missing: String },

    #[error("task '{task}' references unknown agent '{agent}'")]
    UnknownAgent { task: String, agent: String },

    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("output key '{key}' is written by both '{first}' and '{second}'")]
    DuplicateOutputKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("task '{task}' cannot write reserved key '{key}'")]
    ReservedOutputKey { task: String, key: String },

    #[error("task '{task}' reads '{key}', which no upstream task writes")]
    UnreachableInputKey { task: String, key: String },

    #[error("invalid agent '{agent}': {reason}")]
    InvalidAgent { agent: String, reason: String },
}

/// Failure talking to the inference backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("no inference backend configured")]
    Unavailable,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Coarse class of a per-task failure, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentErrorKind {
    InputFormat,
    Execution,
    Timeout,
}

/// A single dispatch failed.
///
/// These are contained to the task that raised them: the task is marked
/// failed and its dependents skipped.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(
        "agent '{agent}' could not interpret its input: expected one of [{}], observed [{}]",
        expected.join(", "),
        observed.join(", ")
    )]
    InputFormat {
        agent: String,
        expected: Vec<String>,
        observed: Vec<String>,
    },

    #[error("agent '{agent}' failed: {message}")]
    Execution { agent: String, message: String },

    #[error("agent '{agent}' backend call failed: {source}")]
    Backend {
        agent: String,
        #[source]
        source: BackendError,
    },

    #[error("agent '{agent}' timed out after {timeout:?}")]
    Timeout { agent: String, timeout: Duration },

    #[error("task '{task}' input key '{key}' is missing from the context")]
    MissingInput { task: String, key: String },
}

impl AgentError {
    pub fn execution(agent: &str, message: impl Into<String>) -> Self {
        Self::Execution {
            agent: agent.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> AgentErrorKind {
        match self {
            AgentError::InputFormat { .. } => AgentErrorKind::InputFormat,
            AgentError::Timeout { .. } => AgentErrorKind::Timeout,
            AgentError::Execution { .. }
            | AgentError::Backend { .. }
            | AgentError::MissingInput { .. } => AgentErrorKind::Execution,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == AgentErrorKind::Timeout
    }
}
