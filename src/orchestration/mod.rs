//! Orchestration layer: running a validated task graph.
//!
//! The [`Runner`] drives waves of dispatches, the [`RecoveryPipeline`] gives
//! failed dispatches one corrected retry, and the [`Journal`] carries
//! execution log entries to whatever sink the caller provides.

pub mod journal;
pub mod recovery;
pub mod scheduler;

pub use journal::{
    ChannelSink, Journal, JsonlSink, LogEntry, LogKind, LogScope, LogSink, MemorySink, NullSink,
};
pub use recovery::{Correction, RecoveryOutcome, RecoveryPipeline, RecoveryRule};
pub use scheduler::{HaltRecord, RunResult, RunStatus, Runner, RunnerConfig, TaskSummary};
