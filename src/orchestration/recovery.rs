//! Bounded error recovery.
//!
//! A failed dispatch is checked against an ordered table of rules. The first
//! rule that recognises the failure supplies a corrected input and the agent
//! is called once more with it. Each task gets at most one such retry per
//! run. Matching is heuristic and best-effort: an unrecognised failure is
//! simply left as it is.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::{AgentOutput, Dispatch};
use crate::error::AgentError;
use crate::orchestration::journal::{Journal, LogKind};
use crate::util::dispatch_with_timeout;

static PROTOCOL_RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s'"(`])(//[A-Za-z0-9][A-Za-z0-9.-]*(?::\d+)?/[^\s'"()`]*)"#)
        .expect("valid protocol-relative regex")
});

/// Replacement input and a description of what was changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub action: String,
    pub input: Value,
}

/// One recognisable failure class.
#[derive(Clone, Copy)]
pub struct RecoveryRule {
    pub name: &'static str,
    pub matches: fn(&AgentError, &Value) -> Option<Correction>,
}

impl std::fmt::Debug for RecoveryRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryRule").field("name", &self.name).finish()
    }
}

#[derive(Debug)]
pub enum RecoveryOutcome {
    Recovered {
        output: AgentOutput,
        rule: &'static str,
    },
    /// Carries the error the task should fail with.
    NoRecovery { error: AgentError },
}

/// A network identifier written without a scheme (`//host/path`) that
/// ended up treated as a local path.
fn protocol_relative_url(error: &AgentError, input: &Value) -> Option<Correction> {
    let text = error.to_string();
    let identifier = PROTOCOL_RELATIVE_RE
        .captures_iter(&text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|id| contains_bare(input, id))?;
    let fixed = format!("http:{}", identifier);
    Some(Correction {
        action: format!("rewrote '{}' as '{}'", identifier, fixed),
        input: replace_bare(input, identifier, &fixed),
    })
}

/// A structured input that arrived serialized as a string.
fn stringified_json(error: &AgentError, input: &Value) -> Option<Correction> {
    if !matches!(error, AgentError::InputFormat { .. }) {
        return None;
    }
    let parsed: Value = serde_json::from_str(input.as_str()?.trim()).ok()?;
    if !(parsed.is_object() || parsed.is_array()) {
        return None;
    }
    Some(Correction {
        action: "parsed string input as JSON".to_string(),
        input: parsed,
    })
}

pub fn default_rules() -> Vec<RecoveryRule> {
    vec![
        RecoveryRule {
            name: "protocol-relative-url",
            matches: protocol_relative_url,
        },
        RecoveryRule {
            name: "stringified-json",
            matches: stringified_json,
        },
    ]
}

/// Byte offsets of `needle` in `haystack` that are not already part of a
/// `scheme://` prefix.
fn bare_positions<'a>(haystack: &'a str, needle: &'a str) -> impl Iterator<Item = usize> + 'a {
    haystack
        .match_indices(needle)
        .map(|(i, _)| i)
        .filter(move |&i| !haystack[..i].ends_with(':'))
}

fn contains_bare(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => bare_positions(s, needle).next().is_some(),
        Value::Array(items) => items.iter().any(|v| contains_bare(v, needle)),
        Value::Object(map) => map.values().any(|v| contains_bare(v, needle)),
        _ => false,
    }
}

fn replace_bare(value: &Value, needle: &str, with: &str) -> Value {
    match value {
        Value::String(s) => {
            let mut out = String::with_capacity(s.len());
            let mut last = 0;
            for i in bare_positions(s, needle) {
                out.push_str(&s[last..i]);
                out.push_str(with);
                last = i + needle.len();
            }
            out.push_str(&s[last..]);
            Value::String(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| replace_bare(v, needle, with)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), replace_bare(v, needle, with)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Recovery rules plus the per-run retry budget.
#[derive(Debug, Clone)]
pub struct RecoveryPipeline {
    rules: Arc<[RecoveryRule]>,
    attempted: Arc<Mutex<HashSet<String>>>,
}

impl Default for RecoveryPipeline {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl RecoveryPipeline {
    pub fn new(rules: Vec<RecoveryRule>) -> Self {
        Self {
            rules: rules.into(),
            attempted: Arc::default(),
        }
    }

    /// A pipeline that never retries.
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    /// Same rules, fresh budget.
    pub fn for_run(&self) -> Self {
        Self {
            rules: Arc::clone(&self.rules),
            attempted: Arc::default(),
        }
    }

    pub fn rules(&self) -> &[RecoveryRule] {
        &self.rules
    }

    /// First rule that recognises the failure.
    pub fn classify(&self, error: &AgentError, input: &Value) -> Option<(&'static str, Correction)> {
        self.rules
            .iter()
            .find_map(|rule| (rule.matches)(error, input).map(|c| (rule.name, c)))
    }

    /// Claim the task's single retry. False if it was already used.
    fn claim(&self, task: &str) -> bool {
        self.attempted
            .lock()
            .map(|mut set| set.insert(task.to_string()))
            .unwrap_or(false)
    }

    pub async fn recover(
        &self,
        task: &str,
        agent: &dyn Dispatch,
        error: AgentError,
        input: &Value,
        timeout: Duration,
        journal: &Journal,
    ) -> RecoveryOutcome {
        let Some((rule, correction)) = self.classify(&error, input) else {
            debug!(task, error = %error, "no recovery rule matches");
            return RecoveryOutcome::NoRecovery { error };
        };

        if !self.claim(task) {
            journal.task(
                task,
                LogKind::Warning,
                "recovery budget exhausted",
                json!({ "error": error.to_string(), "rule": rule }),
            );
            return RecoveryOutcome::NoRecovery { error };
        }

        let retry = dispatch_with_timeout(agent, correction.input, journal, timeout).await;
        let outcome = match &retry {
            Ok(_) => "succeeded".to_string(),
            Err(e) => format!("failed: {}", e),
        };
        journal.task(
            task,
            LogKind::Recovery,
            format!("retried with rule '{}'", rule),
            json!({
                "original_error": error.to_string(),
                "rule": rule,
                "action": correction.action,
                "outcome": outcome,
            }),
        );

        match retry {
            Ok(output) => RecoveryOutcome::Recovered { output, rule },
            Err(error) => RecoveryOutcome::NoRecovery { error },
        }
    }
}
