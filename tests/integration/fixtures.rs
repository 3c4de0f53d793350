//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted and instrumented dispatchers
//! - A canned inference backend
//! - Predefined projects

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use mimi::agent::{AgentOutput, Dispatch};
use mimi::backend::{GenerationSettings, InferenceBackend};
use mimi::core::task::TaskDef;
use mimi::error::{AgentError, BackendError};
use mimi::orchestration::{Journal, LogEntry, MemorySink};
use mimi::project::{AgentDef, AgentType, Project};

/// A journal backed by an in-memory sink the test can inspect.
pub fn memory_journal() -> (Journal, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Journal::new(sink.clone()), sink)
}

/// Entries about a single task, in emission order.
pub fn task_entries(sink: &MemorySink, task: &str) -> Vec<LogEntry> {
    sink.entries()
        .into_iter()
        .filter(|e| matches!(&e.scope, mimi::orchestration::LogScope::Task { name } if name == task))
        .collect()
}

/// Dispatcher that records every input and answers from a fixed script.
pub struct Scripted {
    name: String,
    reply: Result<Value, String>,
    delay: Duration,
    calls: AtomicUsize,
    inputs: Mutex<Vec<Value>>,
}

impl Scripted {
    pub fn ok(name: &str, reply: Value) -> Arc<Self> {
        Self::build(name, Ok(reply), Duration::ZERO)
    }

    pub fn failing(name: &str, message: &str) -> Arc<Self> {
        Self::build(name, Err(message.to_string()), Duration::ZERO)
    }

    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Self::build(name, Ok(json!("done")), delay)
    }

    fn build(name: &str, reply: Result<Value, String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply,
            delay,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<Value> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatch for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value, _journal: &Journal) -> Result<AgentOutput, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            Ok(value) => Ok(AgentOutput::Value(value.clone())),
            Err(message) => Err(AgentError::execution(&self.name, message.clone())),
        }
    }
}

/// Opens the `path` field of its input. Only scheme-qualified locations open.
pub struct Opener {
    calls: AtomicUsize,
}

impl Opener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatch for Opener {
    fn name(&self) -> &str {
        "opener"
    }

    async fn execute(&self, input: Value, _journal: &Journal) -> Result<AgentOutput, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = input["path"].as_str().unwrap_or_default();
        if path.starts_with("//") {
            return Err(AgentError::execution(
                "opener",
                format!("No such file or directory: '{}'", path),
            ));
        }
        Ok(AgentOutput::Value(json!({ "opened": path })))
    }
}

/// Tracks how many calls are in flight at once.
pub struct Gauge {
    name: String,
    hold: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    /// Gauges sharing one pair of counters.
    pub fn group(names: &[&str], hold: Duration) -> (Vec<Arc<Gauge>>, Arc<AtomicUsize>) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let gauges = names
            .iter()
            .map(|name| {
                Arc::new(Gauge {
                    name: name.to_string(),
                    hold,
                    in_flight: Arc::clone(&in_flight),
                    peak: Arc::clone(&peak),
                })
            })
            .collect();
        (gauges, peak)
    }
}

#[async_trait]
impl Dispatch for Gauge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value, _journal: &Journal) -> Result<AgentOutput, AgentError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(AgentOutput::Value(input))
    }
}

/// Backend that answers every prompt with the same text.
pub struct CannedBackend {
    reply: String,
    calls: AtomicUsize,
}

impl CannedBackend {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for CannedBackend {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _system_prompt: &str,
        _settings: &GenerationSettings,
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Five adders chained through explicit input keys: `input -> r1 -> ... -> r5`.
pub fn arithmetic_chain() -> Project {
    let mut project = Project::new("arithmetic chain");
    for n in 1..=5 {
        let agent = format!("add{}", n);
        let task = format!("t{}", n);
        let output = format!("r{}", n);
        let input = if n == 1 {
            "input".to_string()
        } else {
            format!("r{}", n - 1)
        };
        let mut def = TaskDef::new(&task, &agent, &output).with_input_key(&input);
        if n > 1 {
            def = def.depends_on(&[&format!("t{}", n - 1)]);
        }
        project = project
            .with_agent(AgentDef::adder(&agent, n))
            .with_task(def);
    }
    project
}

/// Verifier, feedback, then a report that should only run on a clean check.
pub fn verification_project() -> Project {
    Project::new("verification")
        .with_agent(AgentDef::new("checker", AgentType::Analyst))
        .with_agent(AgentDef::new("gate", AgentType::FeedbackProcessor))
        .with_agent(AgentDef::new("reporter", AgentType::Default))
        .with_task(TaskDef::new("verify", "checker", "verification").with_input_key("input"))
        .with_task(TaskDef::new("feedback", "gate", "decision").depends_on(&["verify"]))
        .with_task(TaskDef::new("report", "reporter", "report").depends_on(&["feedback"]))
}

/// A traced computation `10 + 1 + 2 = 13`, optionally with a wrong second step.
pub fn computation_record(corrupt: bool) -> Value {
    let last = if corrupt { 14 } else { 13 };
    json!({
        "input_value": 10,
        "result": last,
        "total_added": 3,
        "steps": [
            {"step": 1, "value_before": 10, "value_after": 11, "added": 1},
            {"step": 2, "value_before": 11, "value_after": last, "added": 2},
        ],
    })
}
