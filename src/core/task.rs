//! Task data model for the execution DAG.
//!
//! A [`TaskDef`] is the static definition read from a project file. A
//! [`Task`] is the per-run record the scheduler owns: status, timing, the
//! input it was handed and the error it captured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Static definition of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    /// Unique name of the task within a project.
    pub name: String,
    /// What the task does.
    #[serde(default)]
    pub description: String,
    /// Name of the agent that executes this task.
    pub agent: String,
    /// Context key to read the input from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_key: Option<String>,
    /// Context key the output is written to.
    pub output_key: String,
    /// Names of tasks that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TaskDef {
    pub fn new(name: &str, agent: &str, output_key: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            agent: agent.to_string(),
            input_key: None,
            output_key: output_key.to_string(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_input_key(mut self, key: &str) -> Self {
        self.input_key = Some(key.to_string());
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Task status in its lifecycle.
///
/// `Completed`, `Failed` and `Skipped` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Created at run start, not yet eligible.
    Pending,
    /// All dependencies completed.
    Ready,
    /// Dispatched to its agent.
    Running,
    /// Agent returned successfully.
    Completed,
    /// Agent failed and recovery did not help.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Never executed.
    Skipped {
        /// Why the task was not executed.
        reason: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::Skipped { .. }
        )
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Per-run state of a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Name of the task.
    pub name: String,
    /// Agent assigned to the task.
    pub agent: String,
    /// Wave in which the task becomes eligible.
    pub generation: usize,
    /// Current execution status.
    pub status: TaskStatus,
    /// When the agent call began, after any wait for a concurrency slot.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state after running.
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall time spent in the agent, including a recovery retry.
    #[serde(with = "duration_ms", default)]
    pub duration: Option<Duration>,
    /// The resolved input handed to the agent.
    pub input: Option<Value>,
    /// Whether the result came from a recovery retry.
    #[serde(default)]
    pub recovered: bool,
}

impl Task {
    /// Create a pending task record from its definition.
    pub fn new(def: &TaskDef, generation: usize) -> Self {
        Self {
            name: def.name.clone(),
            agent: def.agent.clone(),
            generation,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            duration: None,
            input: None,
            recovered: false,
        }
    }

    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    /// Transition to Running and record the start time.
    pub fn start(&mut self, input: Value) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.input = Some(input);
    }

    pub fn complete(&mut self, duration: Duration) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.duration = Some(duration);
    }

    pub fn fail(&mut self, error: &str, duration: Duration) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
        self.duration = Some(duration);
    }

    /// Replace the recorded times with the agent call's own start and end.
    pub fn stamp_window(&mut self, window: Option<(DateTime<Utc>, DateTime<Utc>)>) {
        if let Some((started_at, completed_at)) = window {
            self.started_at = Some(started_at);
            self.completed_at = Some(completed_at);
        }
    }

    pub fn skip(&mut self, reason: &str) {
        self.status = TaskStatus::Skipped {
            reason: reason.to_string(),
        };
    }

    /// The captured error or skip reason, if the task did not complete.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed { error } => Some(error),
            TaskStatus::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
