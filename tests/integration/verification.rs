//! Verifier and feedback agents deciding whether a run goes on.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mimi::agent::AgentSet;
use mimi::backend::NoBackend;
use mimi::core::task::{TaskDef, TaskStatus};
use mimi::orchestration::{LogKind, Runner, RunnerConfig, RunStatus};
use mimi::project::{AgentDef, AgentType, Project};

use crate::fixtures::{computation_record, memory_journal, verification_project, Scripted};

/// Test: Halt on a bad computation
/// Given a traced computation whose second step is wrong
/// When the verifier and feedback agents run
/// Then the run halts and the later wave is skipped
#[tokio::test]
async fn test_bad_step_halts_run() {
    let project = verification_project().validate().unwrap();
    let (journal, sink) = memory_journal();
    let agents = AgentSet::from_project(&project, Arc::new(NoBackend));

    let result = Runner::for_project(&project, agents, RunnerConfig::default())
        .with_journal(journal)
        .run(computation_record(true))
        .await;

    assert_eq!(result.status, RunStatus::Halted);
    let halt = result.halt.as_ref().unwrap();
    assert_eq!(halt.task, "feedback");
    assert!(halt.message.contains("step 2"), "{}", halt.message);

    let verification = &result.context["verification"];
    assert_eq!(verification["passed"], json!(false));
    assert_eq!(result.context["decision"]["decision"], json!("halt"));

    assert!(matches!(
        result.task("report").unwrap().status,
        TaskStatus::Skipped { .. }
    ));
    assert!(!result.context.contains_key("report"));
    assert!(sink
        .entries()
        .iter()
        .any(|e| e.kind == LogKind::Warning && e.message == "halt requested"));
}

/// Test: Halt stops later waves but not the current one
/// Given a halting feedback task beside a slow sibling in the same wave
/// And a later-wave task that depends only on the sibling
/// When the run executes
/// Then the sibling completes and the later task is skipped without being called
#[tokio::test]
async fn test_halt_skips_independent_later_wave() {
    let project = Project::new("halt scope")
        .with_agent(AgentDef::new("checker", AgentType::Analyst))
        .with_agent(AgentDef::new("gate", AgentType::FeedbackProcessor))
        .with_agent(AgentDef::new("sibling", AgentType::Default))
        .with_agent(AgentDef::new("after", AgentType::Default))
        .with_task(TaskDef::new("verify", "checker", "verification").with_input_key("input"))
        .with_task(TaskDef::new("feedback", "gate", "decision").depends_on(&["verify"]))
        .with_task(TaskDef::new("side", "sibling", "side_out").depends_on(&["verify"]))
        .with_task(TaskDef::new("later", "after", "later_out").depends_on(&["side"]))
        .validate()
        .unwrap();
    assert_eq!(project.graph().wave_count(), 3);

    let sibling = Scripted::slow("sibling", Duration::from_millis(100));
    let after = Scripted::ok("after", json!("late"));
    let mut agents = AgentSet::from_project(&project, Arc::new(NoBackend));
    agents.insert_arc(sibling.clone());
    agents.insert_arc(after.clone());

    let result = Runner::for_project(&project, agents, RunnerConfig::default())
        .run(computation_record(true))
        .await;

    assert_eq!(result.status, RunStatus::Halted);
    assert_eq!(result.halt.as_ref().unwrap().task, "feedback");

    assert_eq!(sibling.calls(), 1);
    assert_eq!(result.task("side").unwrap().status, TaskStatus::Completed);
    assert_eq!(result.context["side_out"], json!("done"));

    assert_eq!(after.calls(), 0);
    assert!(matches!(
        &result.task("later").unwrap().status,
        TaskStatus::Skipped { reason } if reason.contains("halted")
    ));
    assert!(!result.context.contains_key("later_out"));
}

/// Test: Clean computation continues
/// Given a correct traced computation
/// When the verifier and feedback agents run
/// Then the decision is continue and the report runs
#[tokio::test]
async fn test_clean_computation_continues() {
    let project = verification_project().validate().unwrap();
    let result = mimi::run(&project, Arc::new(NoBackend), computation_record(false)).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.halt.is_none());
    assert_eq!(result.context["verification"]["passed"], json!(true));
    assert_eq!(result.context["decision"]["decision"], json!("continue"));
    assert_eq!(result.context["report"], result.context["decision"]);
}

/// Test: Traced adder checked downstream
/// Given an adder that records its steps feeding the verifier
/// When the run completes
/// Then the verifier passes every step
#[tokio::test]
async fn test_traced_adder_verifies() {
    let mut adder = AgentDef::adder("add", 4);
    adder.repetitions = Some(3);
    adder.trace_steps = true;
    let project = Project::new("traced")
        .with_agent(adder)
        .with_agent(AgentDef::new("checker", AgentType::Analyst))
        .with_agent(AgentDef::new("gate", AgentType::FeedbackProcessor))
        .with_task(TaskDef::new("compute", "add", "computation"))
        .with_task(TaskDef::new("verify", "checker", "verification").depends_on(&["compute"]))
        .with_task(TaskDef::new("decide", "gate", "decision").depends_on(&["verify"]))
        .validate()
        .unwrap();

    let result = mimi::run(&project, Arc::new(NoBackend), json!(10)).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.context["computation"]["result"], json!(22));
    assert_eq!(result.context["verification"]["passed"], json!(true));
    assert_eq!(result.context["verification"]["expected_result"], json!(22.0));
}

/// Test: Verifier rejects unrelated input
#[tokio::test]
async fn test_verifier_input_format_error() {
    let project = verification_project().validate().unwrap();
    let result = mimi::run(&project, Arc::new(NoBackend), json!({"numbers": [1, 2]})).await;

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.task("verify").unwrap().error().unwrap().to_string();
    assert!(error.contains("input_value"), "{}", error);
    assert!(error.contains("numbers"), "{}", error);
    assert!(result.halt.is_none());
}
