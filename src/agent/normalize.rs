//! Ordered-key-fallback input normalization.
//!
//! A task's input may arrive as a bare scalar, as a mapping carrying one of
//! the agent's expected keys, or as a mapping whose values are themselves
//! mappings (a dependency that produced structured output). [`extract`]
//! resolves all three shapes the same way for every agent variant:
//!
//! 1. each expected key, in priority order, against the top-level mapping
//! 2. each expected key against the nested mapping values, one level down
//! 3. the whole input as a scalar payload, if the variant accepts scalars
//!
//! Text variants also take a mapping with none of their keys as the payload,
//! rendered as JSON. Anything else is an [`AgentError::InputFormat`] listing what was expected
//! and what was actually there.

use serde_json::{Map, Value};

use crate::error::AgentError;

/// Which bare scalars an agent will take as its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarPolicy {
    /// Mappings only.
    Reject,
    /// Strings, numbers and booleans.
    Text,
    /// Numbers and strings that parse as numbers.
    Numeric,
}

/// The keys an agent looks for, highest priority first.
#[derive(Debug, Clone, Copy)]
pub struct Expectation {
    pub keys: &'static [&'static str],
    pub scalar: ScalarPolicy,
}

impl Expectation {
    pub const fn new(keys: &'static [&'static str], scalar: ScalarPolicy) -> Self {
        Self { keys, scalar }
    }

    fn accepts_scalar(&self, value: &Value) -> bool {
        match (self.scalar, value) {
            (ScalarPolicy::Reject, _) => false,
            (ScalarPolicy::Text, Value::String(_) | Value::Number(_) | Value::Bool(_)) => true,
            (ScalarPolicy::Numeric, Value::Number(_)) => true,
            (ScalarPolicy::Numeric, Value::String(s)) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        }
    }
}

/// Where the payload was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    TopLevel(&'static str),
    Nested {
        parent_index: usize,
        key: &'static str,
    },
    Scalar,
}

impl Source {
    /// The expected key that matched, if any.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Source::TopLevel(key) | Source::Nested { key, .. } => Some(*key),
            Source::Scalar => None,
        }
    }
}

/// A normalized payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<'a> {
    pub value: &'a Value,
    pub source: Source,
}

impl Extracted<'_> {
    pub fn key(&self) -> Option<&'static str> {
        self.source.key()
    }

    /// The payload as prompt text: strings verbatim, anything else as pretty JSON.
    pub fn as_text(&self) -> String {
        value_text(self.value)
    }
}

/// Resolve `input` against `expect`, or fail with an `InputFormat` error.
pub fn extract<'a>(
    agent: &str,
    input: &'a Value,
    expect: &Expectation,
) -> Result<Extracted<'a>, AgentError> {
    if let Value::Object(map) = input {
        if let Some(found) = lookup_top(map, expect) {
            return Ok(found);
        }
        if let Some(found) = lookup_nested(map, expect) {
            return Ok(found);
        }
        // Text agents read an unrecognized mapping whole.
        if expect.scalar == ScalarPolicy::Text {
            return Ok(Extracted {
                value: input,
                source: Source::Scalar,
            });
        }
    } else if expect.accepts_scalar(input) {
        return Ok(Extracted {
            value: input,
            source: Source::Scalar,
        });
    }
    Err(input_format_error(agent, input, expect.keys))
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn lookup_top<'a>(map: &'a Map<String, Value>, expect: &Expectation) -> Option<Extracted<'a>> {
    expect.keys.iter().find_map(|&key| {
        present(map.get(key)).map(|value| Extracted {
            value,
            source: Source::TopLevel(key),
        })
    })
}

fn lookup_nested<'a>(map: &'a Map<String, Value>, expect: &Expectation) -> Option<Extracted<'a>> {
    for &key in expect.keys {
        for (parent_index, nested) in map.values().enumerate() {
            if let Some(value) = present(nested.as_object().and_then(|m| m.get(key))) {
                return Some(Extracted {
                    value,
                    source: Source::Nested { parent_index, key },
                });
            }
        }
    }
    None
}

/// Find the mapping, top-level or one level down, that carries every marker key.
pub fn find_record<'a>(input: &'a Value, markers: &[&str]) -> Option<&'a Map<String, Value>> {
    let map = input.as_object()?;
    let has_all = |m: &Map<String, Value>| markers.iter().all(|k| present(m.get(*k)).is_some());
    if has_all(map) {
        return Some(map);
    }
    map.values()
        .filter_map(Value::as_object)
        .find(|nested| has_all(*nested))
}

/// Keys observed in `input`, for diagnostics.
///
/// Nested keys are reported as `parent.child`; non-mappings as `<kind>`.
pub fn observed_keys(input: &Value) -> Vec<String> {
    let Value::Object(map) = input else {
        return vec![kind_label(input).to_string()];
    };
    let mut keys = Vec::new();
    for (key, value) in map {
        keys.push(key.clone());
        if let Value::Object(nested) = value {
            keys.extend(nested.keys().map(|child| format!("{}.{}", key, child)));
        }
    }
    keys
}

pub fn input_format_error(agent: &str, input: &Value, expected: &[&str]) -> AgentError {
    AgentError::InputFormat {
        agent: agent.to_string(),
        expected: expected.iter().map(|k| k.to_string()).collect(),
        observed: observed_keys(input),
    }
}

fn kind_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "<null>",
        Value::Bool(_) => "<bool>",
        Value::Number(_) => "<number>",
        Value::String(_) => "<string>",
        Value::Array(_) => "<array>",
        Value::Object(_) => "<mapping>",
    }
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
