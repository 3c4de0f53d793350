//! Parallel dispatch within a wave.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use mimi::agent::AgentSet;
use mimi::core::task::{TaskDef, TaskStatus};
use mimi::orchestration::{Runner, RunnerConfig, RunStatus};
use mimi::project::{AgentDef, AgentType, Project, ValidatedProject};

use crate::fixtures::{Gauge, Scripted};

const NAMES: [&str; 6] = ["p0", "p1", "p2", "p3", "p4", "p5"];

fn wide_project() -> ValidatedProject {
    let mut project = Project::new("wide");
    for name in NAMES {
        project = project
            .with_agent(AgentDef::new(name, AgentType::Default))
            .with_task(TaskDef::new(&format!("task_{}", name), name, &format!("out_{}", name)));
    }
    project.validate().unwrap()
}

fn gauge_agents(hold: Duration) -> (AgentSet, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
    let (gauges, peak) = Gauge::group(&NAMES, hold);
    let mut agents = AgentSet::new();
    for gauge in gauges {
        agents.insert_arc(gauge);
    }
    (agents, peak)
}

/// Test: Concurrency limit
/// Given six independent tasks and a limit of two
/// When the wave runs
/// Then no more than two calls are ever in flight
#[tokio::test]
async fn test_concurrency_limit_respected() {
    let project = wide_project();
    assert_eq!(project.graph().wave_count(), 1);
    let (agents, peak) = gauge_agents(Duration::from_millis(30));

    let config = RunnerConfig {
        max_concurrency: 2,
        ..RunnerConfig::default()
    };
    let result = Runner::for_project(&project, agents, config).run(json!(0)).await;

    assert_eq!(result.status, RunStatus::Completed);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak in flight was {}", peak);
    assert!(peak >= 1);
}

/// Test: Same-wave tasks overlap
/// Given six independent tasks and a limit above six
/// When the wave runs
/// Then more than one call is in flight at once
#[tokio::test]
async fn test_wave_runs_concurrently() {
    let project = wide_project();
    let (agents, peak) = gauge_agents(Duration::from_millis(50));

    let config = RunnerConfig {
        max_concurrency: 8,
        ..RunnerConfig::default()
    };
    let result = Runner::for_project(&project, agents, config).run(json!(0)).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(peak.load(Ordering::SeqCst) > 1);
    for name in NAMES {
        assert_eq!(result.context[&format!("out_{}", name)], json!(0));
    }
}

/// Test: Cancellation between waves
/// Given a token cancelled before the run starts
/// When the run executes
/// Then every task is skipped and the run is halted
#[tokio::test]
async fn test_cancelled_run_skips_everything() {
    let first = Scripted::ok("first", json!(1));
    let project = Project::new("cancel")
        .with_agent(AgentDef::new("first", AgentType::Default))
        .with_task(TaskDef::new("one", "first", "out"))
        .validate()
        .unwrap();
    let mut agents = AgentSet::new();
    agents.insert_arc(first.clone());

    let token = CancellationToken::new();
    token.cancel();
    let result = Runner::for_project(&project, agents, RunnerConfig::default())
        .with_cancellation(token)
        .run(json!(0))
        .await;

    assert_eq!(result.status, RunStatus::Halted);
    assert_eq!(first.calls(), 0);
    assert!(matches!(
        result.task("one").unwrap().status,
        TaskStatus::Skipped { .. }
    ));
}

/// Test: Start time excludes the wait for a slot
/// Given two independent slow tasks and a limit of one
/// When the wave runs
/// Then the second task starts no earlier than the first one completed
#[tokio::test]
async fn test_started_at_after_permit() {
    let project = Project::new("serial")
        .with_agent(AgentDef::new("left", AgentType::Default))
        .with_agent(AgentDef::new("right", AgentType::Default))
        .with_task(TaskDef::new("l", "left", "out_l"))
        .with_task(TaskDef::new("r", "right", "out_r"))
        .validate()
        .unwrap();
    let mut agents = AgentSet::new();
    agents.insert_arc(Scripted::slow("left", Duration::from_millis(50)));
    agents.insert_arc(Scripted::slow("right", Duration::from_millis(50)));

    let config = RunnerConfig {
        max_concurrency: 1,
        ..RunnerConfig::default()
    };
    let result = Runner::for_project(&project, agents, config).run(json!(0)).await;

    assert_eq!(result.status, RunStatus::Completed);
    let mut tasks: Vec<_> = result.tasks.iter().collect();
    tasks.sort_by_key(|t| t.started_at);
    let (first, second) = (tasks[0], tasks[1]);
    assert!(second.started_at.unwrap() >= first.completed_at.unwrap());
}
