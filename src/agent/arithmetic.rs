//! Numeric-step agent: adds a fixed operand to its input.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::normalize::{self, Expectation, ScalarPolicy};
use crate::error::AgentError;

const EXPECTED: Expectation = Expectation::new(
    &["input", "result", "value", "input_value"],
    ScalarPolicy::Numeric,
);

/// Upper bound on `repetitions`; a traced run keeps one record per step.
pub const MAX_REPETITIONS: u32 = 10_000;

/// Integer when both sides are integers, float otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Num::Int)
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(Num::Float))
            }
            _ => None,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn checked_add(self, other: Num) -> Option<Num> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a.checked_add(b).map(Num::Int),
            (a, b) => {
                let sum = a.as_f64() + b.as_f64();
                sum.is_finite().then_some(Num::Float(sum))
            }
        }
    }

    fn checked_mul(self, times: u32) -> Option<Num> {
        match self {
            Num::Int(a) => a.checked_mul(i64::from(times)).map(Num::Int),
            Num::Float(f) => Some(Num::Float(f * f64::from(times))),
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            Num::Int(i) => Value::from(i),
            Num::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        }
    }
}

impl Serialize for Num {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Num::Int(i) => serializer.serialize_i64(*i),
            Num::Float(f) => serializer.serialize_f64(*f),
        }
    }
}

/// One addition in a traced computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationStep {
    pub step: u32,
    pub value_before: Value,
    pub value_after: Value,
    pub added: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberAdder {
    pub number_to_add: i64,
    pub repetitions: u32,
    pub trace_steps: bool,
}

impl NumberAdder {
    pub fn new(number_to_add: i64) -> Self {
        Self {
            number_to_add,
            repetitions: 1,
            trace_steps: false,
        }
    }

    /// Add the operand `repetitions` times to the number found in `input`.
    ///
    /// Returns the bare result, or the full step record when tracing.
    pub fn apply(&self, agent: &str, input: &Value) -> Result<Value, AgentError> {
        if self.repetitions > MAX_REPETITIONS {
            return Err(AgentError::execution(
                agent,
                format!("repetitions {} exceeds {}", self.repetitions, MAX_REPETITIONS),
            ));
        }
        let found = normalize::extract(agent, input, &EXPECTED)?;
        let start = Num::from_value(found.value)
            .ok_or_else(|| normalize::input_format_error(agent, input, EXPECTED.keys))?;
        let operand = Num::Int(self.number_to_add);
        let overflow = || AgentError::execution(agent, "numeric overflow");

        let total_added = operand.checked_mul(self.repetitions).ok_or_else(overflow)?;
        if !self.trace_steps {
            return Ok(start.checked_add(total_added).ok_or_else(overflow)?.to_value());
        }

        let mut current = start;
        let mut steps = Vec::with_capacity(self.repetitions as usize);
        for step in 1..=self.repetitions {
            let next = current.checked_add(operand).ok_or_else(overflow)?;
            steps.push(ComputationStep {
                step,
                value_before: current.to_value(),
                value_after: next.to_value(),
                added: operand.to_value(),
            });
            current = next;
        }

        Ok(serde_json::json!({
            "result": current,
            "input_value": start,
            "number_added": self.number_to_add,
            "repetitions": self.repetitions,
            "total_added": total_added,
            "steps": steps,
        }))
    }
}
