//! Failure containment, skipping, timeouts and bounded recovery.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mimi::agent::AgentSet;
use mimi::backend::NoBackend;
use mimi::core::task::{TaskDef, TaskStatus};
use mimi::orchestration::{LogKind, RecoveryPipeline, Runner, RunnerConfig, RunStatus};
use mimi::project::{AgentDef, AgentType, Project, ValidatedProject};

use crate::fixtures::{memory_journal, task_entries, Opener, Scripted};

fn project(agents: &[&str], tasks: Vec<TaskDef>) -> ValidatedProject {
    let mut project = Project::new("failures");
    for name in agents {
        project = project.with_agent(AgentDef::new(name, AgentType::Default));
    }
    for task in tasks {
        project = project.with_task(task);
    }
    project.validate().unwrap()
}

/// Test: Skip propagation
/// Given A -> B -> C where A fails
/// When the run finishes
/// Then B and C are skipped without their agents ever being called
#[tokio::test]
async fn test_failure_skips_dependents() {
    let a = Scripted::failing("a", "boom");
    let b = Scripted::ok("b", json!("b"));
    let c = Scripted::ok("c", json!("c"));
    let project = project(
        &["a", "b", "c"],
        vec![
            TaskDef::new("A", "a", "oa"),
            TaskDef::new("B", "b", "ob").depends_on(&["A"]),
            TaskDef::new("C", "c", "oc").depends_on(&["B"]),
        ],
    );
    let mut agents = AgentSet::new();
    agents.insert_arc(a.clone());
    agents.insert_arc(b.clone());
    agents.insert_arc(c.clone());

    let result = Runner::for_project(&project, agents, RunnerConfig::default())
        .run(json!(1))
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(matches!(
        &result.task("A").unwrap().status,
        TaskStatus::Failed { error } if error.contains("boom")
    ));
    for name in ["B", "C"] {
        assert!(
            matches!(result.task(name).unwrap().status, TaskStatus::Skipped { .. }),
            "{} should be skipped",
            name
        );
    }
    assert_eq!(b.calls(), 0);
    assert_eq!(c.calls(), 0);
    assert!(!result.context.contains_key("ob"));
}

/// Test: Failure containment
/// Given two independent branches where one fails
/// When the run finishes
/// Then the other branch still completes
#[tokio::test]
async fn test_failure_contained_to_branch() {
    let bad = Scripted::failing("bad", "nope");
    let good = Scripted::ok("good", json!("fine"));
    let after = Scripted::ok("after", json!("later"));
    let project = project(
        &["bad", "good", "after"],
        vec![
            TaskDef::new("broken", "bad", "x"),
            TaskDef::new("healthy", "good", "y"),
            TaskDef::new("next", "after", "z").depends_on(&["healthy"]),
        ],
    );
    let mut agents = AgentSet::new();
    agents.insert_arc(bad);
    agents.insert_arc(good);
    agents.insert_arc(after.clone());

    let result = Runner::for_project(&project, agents, RunnerConfig::default())
        .run(json!(null))
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.context["z"], json!("later"));
    assert_eq!(after.calls(), 1);
    assert!(result.halt.is_none());
}

/// Test: Stop on failure
/// Given stop_on_failure and an independent task in a later wave
/// When a first-wave task fails
/// Then the later wave is skipped
#[tokio::test]
async fn test_stop_on_failure_skips_later_waves() {
    let bad = Scripted::failing("bad", "nope");
    let good = Scripted::ok("good", json!(1));
    let later = Scripted::ok("later", json!(2));
    let project = project(
        &["bad", "good", "later"],
        vec![
            TaskDef::new("broken", "bad", "x"),
            TaskDef::new("healthy", "good", "y"),
            TaskDef::new("next", "later", "z").depends_on(&["healthy"]),
        ],
    );
    let mut agents = AgentSet::new();
    agents.insert_arc(bad);
    agents.insert_arc(good.clone());
    agents.insert_arc(later.clone());

    let config = RunnerConfig {
        stop_on_failure: true,
        ..RunnerConfig::default()
    };
    let result = Runner::for_project(&project, agents, config).run(json!(0)).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(good.calls(), 1);
    assert_eq!(later.calls(), 0);
    assert!(matches!(
        result.task("next").unwrap().status,
        TaskStatus::Skipped { .. }
    ));
}

/// Test: Timeout
/// Given a per-call timeout shorter than the agent's work
/// When the task runs
/// Then it fails with a timeout and its output is never written
#[tokio::test]
async fn test_timeout_fails_task() {
    let slow = Scripted::slow("slow", Duration::from_secs(5));
    let project = project(&["slow"], vec![TaskDef::new("wait", "slow", "out")]);
    let mut agents = AgentSet::new();
    agents.insert_arc(slow);

    let config = RunnerConfig {
        task_timeout: Duration::from_millis(50),
        ..RunnerConfig::default()
    };
    let result = Runner::for_project(&project, agents, config).run(json!(0)).await;

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.task("wait").unwrap().error().unwrap().to_string();
    assert!(error.contains("timed out"), "{}", error);
    assert!(!result.context.contains_key("out"));
}

/// Test: Bounded recovery
/// Given an agent that fails on a protocol-relative path every time
/// When recovery rewrites the path and retries
/// Then the agent is called exactly twice and the task fails with one recovery entry
#[tokio::test]
async fn test_recovery_retries_once() {
    let stubborn = Scripted::failing("stubborn", "No such file or directory: '//fileserver/reports/q3.csv'");
    let project = project(
        &["stubborn"],
        vec![TaskDef::new("read", "stubborn", "report")],
    );
    let mut agents = AgentSet::new();
    agents.insert_arc(stubborn.clone());

    let (journal, sink) = memory_journal();
    let result = Runner::for_project(&project, agents, RunnerConfig::default())
        .with_journal(journal)
        .run(json!({"path": "//fileserver/reports/q3.csv"}))
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(stubborn.calls(), 2);
    let inputs = stubborn.inputs();
    assert_eq!(inputs[1], json!({"path": "http://fileserver/reports/q3.csv"}));

    let recoveries = sink.of_kind(LogKind::Recovery);
    assert_eq!(recoveries.len(), 1);
    assert_eq!(recoveries[0].details["rule"], json!("protocol-relative-url"));
    assert!(recoveries[0].details["outcome"]
        .as_str()
        .unwrap()
        .starts_with("failed"));
    assert!(!result.task("read").unwrap().recovered);
}

/// Test: Successful recovery
/// Given an agent that only opens scheme-qualified locations
/// When it is handed a protocol-relative path
/// Then the corrected retry succeeds and the task is marked recovered
#[tokio::test]
async fn test_recovery_succeeds() {
    let opener = Opener::new();
    let project = project(&["opener"], vec![TaskDef::new("open", "opener", "doc")]);
    let mut agents = AgentSet::new();
    agents.insert_arc(opener.clone());

    let (journal, sink) = memory_journal();
    let result = Runner::for_project(&project, agents, RunnerConfig::default())
        .with_journal(journal)
        .run(json!({"path": "//docs.internal/guide.md"}))
        .await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(opener.calls(), 2);
    assert_eq!(result.context["doc"], json!({"opened": "http://docs.internal/guide.md"}));
    assert!(result.task("open").unwrap().recovered);

    let messages: Vec<String> = task_entries(&sink, "open")
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(
        messages,
        ["started", "retried with rule 'protocol-relative-url'", "completed"]
    );
}

/// Test: Recovery disabled
#[tokio::test]
async fn test_recovery_can_be_disabled() {
    let opener = Opener::new();
    let project = project(&["opener"], vec![TaskDef::new("open", "opener", "doc")]);
    let mut agents = AgentSet::new();
    agents.insert_arc(opener.clone());

    let result = Runner::for_project(&project, agents, RunnerConfig::default())
        .with_recovery(RecoveryPipeline::disabled())
        .run(json!({"path": "//docs.internal/guide.md"}))
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(opener.calls(), 1);
}

/// Test: Stringified input recovery with a built-in agent
/// Given a numeric agent handed its input as a JSON string
/// When the first call fails on input format
/// Then the parsed retry succeeds
#[tokio::test]
async fn test_stringified_input_recovered() {
    let project = Project::new("stringly")
        .with_agent(AgentDef::adder("add", 5))
        .with_task(TaskDef::new("sum", "add", "total"))
        .validate()
        .unwrap();

    let result = mimi::run(&project, Arc::new(NoBackend), json!(r#"{"result": 5}"#)).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.context["total"], json!(10));
    assert!(result.task("sum").unwrap().recovered);
}

/// Test: Backend failure is contained
/// Given a generative agent with no backend available
/// When it runs
/// Then the task fails with the backend error and no recovery applies
#[tokio::test]
async fn test_backend_failure_fails_task() {
    let project = Project::new("offline")
        .with_agent(AgentDef::new("researcher", AgentType::ResearchAnalyst))
        .with_task(TaskDef::new("research", "researcher", "specs"))
        .validate()
        .unwrap();

    let result = mimi::run(&project, Arc::new(NoBackend), json!("requirements")).await;

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.task("research").unwrap().error().unwrap().to_string();
    assert!(error.contains("no inference backend configured"), "{}", error);
}
