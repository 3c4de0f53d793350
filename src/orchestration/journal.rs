//! Execution log entries and the sinks that receive them.
//!
//! The engine only ever emits entries; it never reads them back. Sinks are
//! fire-and-forget: a sink that cannot accept an entry drops it rather than
//! blocking or failing the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// What an entry is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope")]
pub enum LogScope {
    Run,
    Task { name: String },
    Agent { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Warning,
    Error,
    Recovery,
}

/// One append-only execution log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    #[serde(flatten)]
    pub scope: LogScope,
    pub kind: LogKind,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

/// Receiver of execution log entries.
pub trait LogSink: Send + Sync {
    fn emit(&self, entry: LogEntry);
}

/// Discards every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _entry: LogEntry) {}
}

/// Keeps entries in memory. Mostly useful in tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn of_kind(&self, kind: LogKind) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Forwards entries over an unbounded channel.
///
/// Sending never blocks; entries are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LogEntry>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, entry: LogEntry) {
        let _ = self.tx.send(entry);
    }
}

/// Appends entries to a file as JSON lines.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, entry: &LogEntry) -> std::io::Result<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

impl LogSink for JsonlSink {
    fn emit(&self, entry: LogEntry) {
        if let Err(e) = self.append(&entry) {
            tracing::warn!(path = %self.path.display(), error = %e, "dropping journal entry");
        }
    }
}

/// Cloneable handle that stamps entries with the run id and forwards them
/// to a sink. Every entry is mirrored as a `tracing` event.
///
/// The runner stamps each run with its own id through [`Journal::for_run`].
#[derive(Clone)]
pub struct Journal {
    run_id: Uuid,
    sink: Arc<dyn LogSink>,
}

impl Journal {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sink,
        }
    }

    /// A journal that discards entries.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullSink))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Same sink, fresh run id.
    pub fn for_run(&self) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sink: Arc::clone(&self.sink),
        }
    }

    pub fn emit(&self, scope: LogScope, kind: LogKind, message: impl Into<String>, details: Value) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            run_id: self.run_id,
            scope,
            kind,
            message: message.into(),
            details,
        };
        trace_entry(&entry);
        self.sink.emit(entry);
    }

    pub fn run(&self, kind: LogKind, message: impl Into<String>, details: Value) {
        self.emit(LogScope::Run, kind, message, details);
    }

    pub fn task(&self, task: &str, kind: LogKind, message: impl Into<String>, details: Value) {
        self.emit(
            LogScope::Task {
                name: task.to_string(),
            },
            kind,
            message,
            details,
        );
    }

    pub fn agent(&self, agent: &str, kind: LogKind, message: impl Into<String>, details: Value) {
        self.emit(
            LogScope::Agent {
                name: agent.to_string(),
            },
            kind,
            message,
            details,
        );
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("run_id", &self.run_id)
            .finish()
    }
}

fn trace_entry(entry: &LogEntry) {
    let scope = match &entry.scope {
        LogScope::Run => "run".to_string(),
        LogScope::Task { name } => format!("task:{}", name),
        LogScope::Agent { name } => format!("agent:{}", name),
    };
    match entry.kind {
        LogKind::Error => tracing::error!(run = %entry.run_id, %scope, "{}", entry.message),
        LogKind::Warning => tracing::warn!(run = %entry.run_id, %scope, "{}", entry.message),
        LogKind::Recovery => {
            tracing::warn!(run = %entry.run_id, %scope, recovery = true, "{}", entry.message)
        }
        LogKind::Info => tracing::info!(run = %entry.run_id, %scope, "{}", entry.message),
    }
}
