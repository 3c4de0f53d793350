//! Scheduler for wave-based task execution.
//!
//! The runner walks the task graph one generation at a time. Within a wave,
//! tasks whose dependencies all completed are dispatched concurrently under
//! a semaphore; tasks with a failed or skipped dependency are skipped. The
//! wave is a strict barrier: outputs are written to the context only after
//! every dispatch in the wave has finished, and the next wave starts after
//! that.
//!
//! A halt decision always stops later waves. A failure is contained to its
//! dependents unless `stop_on_failure` is set. Cancellation is checked
//! between waves and never interrupts a dispatched task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentOutput, AgentSet};
use crate::core::context::{ExecutionContext, INITIAL_INPUT_KEY};
use crate::core::dag::TaskGraph;
use crate::core::task::{Task, TaskDef, TaskStatus};
use crate::error::AgentError;
use crate::orchestration::journal::{Journal, LogKind};
use crate::orchestration::recovery::{RecoveryOutcome, RecoveryPipeline};
use crate::project::ValidatedProject;
use crate::util::dispatch_with_timeout;

const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Maximum agent calls in flight within a wave.
    pub max_concurrency: usize,
    /// Per agent call. A recovery retry gets its own full timeout.
    pub task_timeout: Duration,
    /// Treat any task failure like a halt.
    pub stop_on_failure: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            stop_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Halted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Halted => write!(f, "halted"),
        }
    }
}

/// The task that asked the run to stop, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltRecord {
    pub task: String,
    pub message: String,
}

/// Per-task status, timing, recorded input and error.
pub type TaskSummary = Task;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub project: String,
    pub status: RunStatus,
    pub context: Map<String, Value>,
    pub tasks: Vec<TaskSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunResult {
    pub fn task(&self, name: &str) -> Option<&TaskSummary> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Tasks that did not complete, with their error or skip reason.
    pub fn problems(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tasks
            .iter()
            .filter_map(|t| t.error().map(|e| (t.name.as_str(), e)))
    }
}

/// Result of one dispatch, carried back across the wave barrier.
struct DispatchOutcome {
    task: String,
    result: Result<AgentOutput, AgentError>,
    recovered: bool,
    /// Wall-clock window of the agent call, from permit to result.
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    duration: Duration,
}

pub struct Runner {
    project: String,
    graph: TaskGraph,
    agents: AgentSet,
    config: RunnerConfig,
    journal: Journal,
    recovery: RecoveryPipeline,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(graph: TaskGraph, agents: AgentSet, config: RunnerConfig) -> Self {
        Self {
            project: String::new(),
            graph,
            agents,
            config,
            journal: Journal::disabled(),
            recovery: RecoveryPipeline::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn for_project(project: &ValidatedProject, agents: AgentSet, config: RunnerConfig) -> Self {
        let mut runner = Self::new(project.graph().clone(), agents, config);
        runner.project = project.name().to_string();
        runner
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryPipeline) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Execute every wave and report the outcome.
    ///
    /// Each call is a separate run with its own run id and recovery budget.
    pub async fn run(&self, initial_input: Value) -> RunResult {
        let started_at = Utc::now();
        let journal = self.journal.for_run();
        let recovery = self.recovery.for_run();
        let mut context = ExecutionContext::with_input(initial_input);
        let mut tasks: HashMap<String, Task> = HashMap::new();
        for def in self.graph.tasks() {
            let generation = self.graph.generation(&def.name).unwrap_or_default();
            tasks.insert(def.name.clone(), Task::new(def, generation));
        }

        journal.run(
            LogKind::Info,
            "run started",
            json!({
                "project": self.project,
                "tasks": self.graph.len(),
                "waves": self.graph.wave_count(),
                "max_concurrency": self.config.max_concurrency,
            }),
        );

        let mut halt: Option<HaltRecord> = None;
        let mut cancelled = false;
        let mut stop_reason: Option<String> = None;

        for (generation, wave) in self.graph.waves().into_iter().enumerate() {
            if stop_reason.is_none() && self.cancel.is_cancelled() {
                cancelled = true;
                stop_reason = Some("run cancelled".to_string());
                journal.run(LogKind::Warning, "run cancelled", Value::Null);
            }
            if let Some(reason) = &stop_reason {
                for def in wave {
                    self.skip(&journal, &mut tasks, def, reason);
                }
                continue;
            }

            let ready = self.prepare_wave(&journal, &wave, &context, &mut tasks);
            info!(
                generation,
                size = wave.len(),
                ready = ready.len(),
                "dispatching wave"
            );
            let outcomes = self.dispatch_wave(&journal, ready, &recovery, &mut tasks).await;

            let mut failed = wave
                .iter()
                .any(|def| matches!(tasks[&def.name].status, TaskStatus::Failed { .. }));
            for outcome in outcomes {
                failed |= self.apply(&journal, outcome, &mut context, &mut tasks, &mut halt);
            }

            if let Some(record) = &halt {
                stop_reason = Some(format!("run halted by task '{}'", record.task));
            } else if failed && self.config.stop_on_failure {
                stop_reason = Some("run stopped after a task failure".to_string());
            }
        }

        let ordered: Vec<Task> = self
            .graph
            .tasks()
            .filter_map(|def| tasks.remove(&def.name))
            .collect();
        let status = if halt.is_some() || cancelled {
            RunStatus::Halted
        } else if ordered.iter().all(|t| t.status.is_completed()) {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        journal.run(
            if status == RunStatus::Completed {
                LogKind::Info
            } else {
                LogKind::Warning
            },
            format!("run {}", status),
            json!({
                "completed": ordered.iter().filter(|t| t.status.is_completed()).count(),
                "tasks": ordered.len(),
            }),
        );

        RunResult {
            run_id: journal.run_id(),
            project: self.project.clone(),
            status,
            context: context.into_inner(),
            tasks: ordered,
            halt,
            started_at,
            completed_at: Utc::now(),
        }
    }

    fn skip(
        &self,
        journal: &Journal,
        tasks: &mut HashMap<String, Task>,
        def: &TaskDef,
        reason: &str,
    ) {
        if let Some(task) = tasks.get_mut(&def.name) {
            task.skip(reason);
        }
        journal.task(&def.name, LogKind::Warning, "skipped", json!({ "reason": reason }));
    }

    /// Skip blocked tasks, resolve inputs for the rest.
    fn prepare_wave<'g>(
        &self,
        journal: &Journal,
        wave: &[&'g TaskDef],
        context: &ExecutionContext,
        tasks: &mut HashMap<String, Task>,
    ) -> Vec<(&'g TaskDef, Value)> {
        let mut ready = Vec::with_capacity(wave.len());
        for &def in wave {
            let blocked: Vec<&str> = def
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|dep| !tasks.get(*dep).is_some_and(|t| t.status.is_completed()))
                .collect();
            if !blocked.is_empty() {
                let reason = format!("dependency did not complete: {}", blocked.join(", "));
                self.skip(journal, tasks, def, &reason);
                continue;
            }

            match self.resolve_input(def, context) {
                Ok(input) => {
                    if let Some(task) = tasks.get_mut(&def.name) {
                        task.mark_ready();
                    }
                    ready.push((def, input));
                }
                Err(error) => {
                    let message = error.to_string();
                    if let Some(task) = tasks.get_mut(&def.name) {
                        task.fail(&message, Duration::ZERO);
                    }
                    journal.task(&def.name, LogKind::Error, "failed", json!({ "error": message }));
                }
            }
        }
        ready
    }

    /// Input handed to a task's agent.
    ///
    /// An explicit `input_key` wins. Otherwise a root task gets the initial
    /// input, a task with one dependency gets that dependency's output, and a
    /// task with several gets a mapping of their outputs by output key.
    fn resolve_input(&self, def: &TaskDef, context: &ExecutionContext) -> Result<Value, AgentError> {
        let read = |key: &str| {
            context.get(key).cloned().ok_or_else(|| AgentError::MissingInput {
                task: def.name.clone(),
                key: key.to_string(),
            })
        };
        if let Some(key) = &def.input_key {
            return read(key.as_str());
        }
        let deps = self.graph.dependencies(&def.name);
        match deps.as_slice() {
            [] => read(INITIAL_INPUT_KEY),
            [only] => read(only.output_key.as_str()),
            many => Ok(Value::Object(
                context.subset(many.iter().map(|d| d.output_key.as_str())),
            )),
        }
    }

    async fn dispatch_wave(
        &self,
        journal: &Journal,
        ready: Vec<(&TaskDef, Value)>,
        recovery: &RecoveryPipeline,
        tasks: &mut HashMap<String, Task>,
    ) -> Vec<DispatchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut set = JoinSet::new();
        let mut outcomes = Vec::with_capacity(ready.len());
        // task name -> agent name, until the outcome comes back
        let mut spawned = HashMap::new();

        for (def, input) in ready {
            if let Some(task) = tasks.get_mut(&def.name) {
                task.start(input.clone());
            }

            let Some(agent) = self.agents.get(&def.agent) else {
                outcomes.push(DispatchOutcome {
                    task: def.name.clone(),
                    result: Err(AgentError::execution(
                        &def.agent,
                        "no dispatcher registered for this agent",
                    )),
                    recovered: false,
                    window: None,
                    duration: Duration::ZERO,
                });
                continue;
            };

            spawned.insert(def.name.clone(), def.agent.clone());
            let task = def.name.clone();
            let semaphore = Arc::clone(&semaphore);
            let journal = journal.clone();
            let recovery = recovery.clone();
            let timeout = self.config.task_timeout;

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let started_at = Utc::now();
                let started = Instant::now();
                journal.task(&task, LogKind::Info, "started", json!({ "agent": agent.name() }));
                debug!(task = %task, agent = agent.name(), "dispatching");
                let first = dispatch_with_timeout(agent.as_ref(), input.clone(), &journal, timeout).await;
                let (result, recovered) = match first {
                    Ok(output) => (Ok(output), false),
                    Err(error) => {
                        match recovery
                            .recover(&task, agent.as_ref(), error, &input, timeout, &journal)
                            .await
                        {
                            RecoveryOutcome::Recovered { output, .. } => (Ok(output), true),
                            RecoveryOutcome::NoRecovery { error } => (Err(error), false),
                        }
                    }
                };
                DispatchOutcome {
                    task,
                    result,
                    recovered,
                    window: Some((started_at, Utc::now())),
                    duration: started.elapsed(),
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    spawned.remove(&outcome.task);
                    outcomes.push(outcome);
                }
                Err(e) => warn!(error = %e, "dispatch task aborted"),
            }
        }
        // Anything still listed here panicked before reporting back.
        for (task, agent) in spawned {
            outcomes.push(DispatchOutcome {
                result: Err(AgentError::execution(&agent, "dispatch panicked")),
                task,
                recovered: false,
                window: None,
                duration: Duration::ZERO,
            });
        }
        outcomes
    }

    /// Record one outcome. Returns true if the task failed.
    fn apply(
        &self,
        journal: &Journal,
        outcome: DispatchOutcome,
        context: &mut ExecutionContext,
        tasks: &mut HashMap<String, Task>,
        halt: &mut Option<HaltRecord>,
    ) -> bool {
        let Some(task) = tasks.get_mut(&outcome.task) else {
            return false;
        };
        let Some(def) = self.graph.task(&outcome.task) else {
            return false;
        };
        task.recovered = outcome.recovered;

        match outcome.result {
            Ok(output) => {
                if let Some(signal) = output.decision().filter(|s| s.is_halt()) {
                    journal.task(
                        &def.name,
                        LogKind::Warning,
                        "halt requested",
                        json!({ "message": signal.message }),
                    );
                    if halt.is_none() {
                        *halt = Some(HaltRecord {
                            task: def.name.clone(),
                            message: signal.message.clone(),
                        });
                    }
                }
                context.insert(&def.output_key, output.into_value());
                task.complete(outcome.duration);
                task.stamp_window(outcome.window);
                journal.task(
                    &def.name,
                    LogKind::Info,
                    "completed",
                    json!({
                        "output_key": def.output_key,
                        "duration_ms": outcome.duration.as_millis() as u64,
                        "recovered": outcome.recovered,
                    }),
                );
                false
            }
            Err(error) => {
                let message = error.to_string();
                task.fail(&message, outcome.duration);
                task.stamp_window(outcome.window);
                journal.task(
                    &def.name,
                    LogKind::Error,
                    "failed",
                    json!({
                        "error": message,
                        "kind": format!("{:?}", error.kind()),
                    }),
                );
                true
            }
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("project", &self.project)
            .field("graph", &self.graph)
            .field("agents", &self.agents)
            .field("config", &self.config)
            .finish()
    }
}
