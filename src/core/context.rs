//! Run-scoped key/value store carrying task outputs to downstream tasks.
//!
//! Each task writes only its own `output_key`. The scheduler applies writes
//! after a wave has finished, so everything written in wave N is visible to
//! every read in wave N+1 and later, and no lock is needed.
//!
//! Writing a key twice overwrites the earlier value. Project validation
//! rejects two tasks sharing an `output_key`, so within a run this only
//! happens when a caller inserts directly.

use serde_json::{Map, Value};

/// Context key holding the run's initial input.
pub const INITIAL_INPUT_KEY: &str = "input";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded with the initial input under [`INITIAL_INPUT_KEY`].
    pub fn with_input(initial: Value) -> Self {
        let mut ctx = Self::new();
        ctx.insert(INITIAL_INPUT_KEY, initial);
        ctx
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Write a value, returning the one it replaced.
    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        self.values.insert(key.to_string(), value)
    }

    /// Mapping of the given keys to their values. Absent keys are left out.
    pub fn subset<'a, I>(&self, keys: I) -> Map<String, Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter()
            .filter_map(|key| self.values.get(key).map(|v| (key.to_string(), v.clone())))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.clone()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.values
    }
}
