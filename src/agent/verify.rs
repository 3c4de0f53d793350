//! Verification and feedback.
//!
//! A verifier checks a traced computation step by step and produces a
//! [`VerificationOutcome`]. A feedback agent turns that outcome into a
//! [`DecisionSignal`] which the runner reads to continue or halt.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::arithmetic::Num;
use super::normalize;
use crate::error::AgentError;

const EPSILON: f64 = 1e-6;

const COMPUTATION_MARKERS: &[&str] = &["input_value", "result"];
const OUTCOME_MARKERS: &[&str] = &["passed", "steps"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Continue,
    Halt,
}

/// Structured output of a feedback agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSignal {
    pub message: String,
    pub decision: Decision,
}

impl DecisionSignal {
    pub fn proceed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            decision: Decision::Continue,
        }
    }

    pub fn halt(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            decision: Decision::Halt,
        }
    }

    pub fn is_halt(&self) -> bool {
        self.decision == Decision::Halt
    }
}

/// One checked fact about a computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub expected: f64,
    pub actual: f64,
    pub pass: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    pub message: String,
    pub expected_result: f64,
    pub actual_result: f64,
    pub steps: Vec<StepRecord>,
}

impl VerificationOutcome {
    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| !s.pass)
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

fn number(record: &Map<String, Value>, key: &str) -> Result<f64, String> {
    record
        .get(key)
        .and_then(Num::from_value)
        .map(Num::as_f64)
        .ok_or_else(|| format!("field '{}' is missing or not numeric", key))
}

/// Check a computation record of the shape the numeric agent traces.
///
/// Each step must start where the previous one ended and add exactly what
/// it claims. The last step must land on `result`, and `input_value +
/// total_added` must equal `result` when a total is given.
pub fn verify_computation(record: &Map<String, Value>) -> Result<VerificationOutcome, String> {
    let input_value = number(record, "input_value")?;
    let result = number(record, "result")?;
    let total_added = match record.get("total_added") {
        Some(_) => Some(number(record, "total_added")?),
        None => None,
    };

    let mut checks = Vec::new();
    let mut running = input_value;

    let steps = match record.get("steps") {
        Some(Value::Array(steps)) => steps.as_slice(),
        Some(_) => return Err("field 'steps' is not a list".to_string()),
        None => &[],
    };
    for (i, step) in steps.iter().enumerate() {
        let step = step
            .as_object()
            .ok_or_else(|| format!("step {} is not a mapping", i + 1))?;
        let before = number(step, "value_before")?;
        let after = number(step, "value_after")?;
        let added = number(step, "added")?;
        let expected = running + added;
        let continuous = close(before, running);
        let pass = continuous && close(after, before + added);
        let description = if continuous {
            format!("step {}: {} + {}", i + 1, before, added)
        } else {
            format!(
                "step {}: starts at {} but previous value was {}",
                i + 1,
                before,
                running
            )
        };
        checks.push(StepRecord {
            index: checks.len() + 1,
            expected,
            actual: after,
            pass,
            description,
        });
        running = after;
    }

    if !steps.is_empty() {
        checks.push(StepRecord {
            index: checks.len() + 1,
            expected: running,
            actual: result,
            pass: close(running, result),
            description: "final step value matches result".to_string(),
        });
    }

    let expected_result = total_added.map_or(running, |total| input_value + total);
    if let Some(total) = total_added {
        checks.push(StepRecord {
            index: checks.len() + 1,
            expected: expected_result,
            actual: result,
            pass: close(expected_result, result),
            description: format!("{} + {} equals result", input_value, total),
        });
    }

    let failed = checks.iter().filter(|c| !c.pass).count();
    let passed = failed == 0;
    let message = if passed {
        format!("all {} checks passed", checks.len())
    } else {
        format!("{} of {} checks failed", failed, checks.len())
    };

    Ok(VerificationOutcome {
        passed,
        message,
        expected_result,
        actual_result: result,
        steps: checks,
    })
}

/// Continue on a passing outcome, halt on a failing one.
pub fn decide(outcome: &VerificationOutcome) -> DecisionSignal {
    if outcome.passed {
        return DecisionSignal::proceed(format!("Verification passed: {}", outcome.message));
    }
    let failing: Vec<String> = outcome
        .failures()
        .map(|s| {
            format!(
                "#{} {} (expected {}, got {})",
                s.index, s.description, s.expected, s.actual
            )
        })
        .collect();
    DecisionSignal::halt(format!(
        "Verification failed: {}; {}",
        outcome.message,
        failing.join("; ")
    ))
}

/// Verifier agent body.
pub fn verify_input(agent: &str, input: &Value) -> Result<Value, AgentError> {
    let record = normalize::find_record(input, COMPUTATION_MARKERS)
        .ok_or_else(|| normalize::input_format_error(agent, input, COMPUTATION_MARKERS))?;
    let outcome = verify_computation(record).map_err(|e| AgentError::execution(agent, e))?;
    serde_json::to_value(outcome).map_err(|e| AgentError::execution(agent, e.to_string()))
}

/// Feedback agent body.
pub fn feedback(agent: &str, input: &Value) -> Result<DecisionSignal, AgentError> {
    let record = normalize::find_record(input, OUTCOME_MARKERS)
        .ok_or_else(|| normalize::input_format_error(agent, input, OUTCOME_MARKERS))?;
    let outcome: VerificationOutcome = serde_json::from_value(Value::Object(record.clone()))
        .map_err(|e| AgentError::execution(agent, format!("malformed verification outcome: {}", e)))?;
    Ok(decide(&outcome))
}
