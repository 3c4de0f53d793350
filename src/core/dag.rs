//! Task DAG (Directed Acyclic Graph) builder and validator.
//!
//! [`TaskGraph::build`] turns a flat list of task definitions into a
//! validated graph and annotates every task with its generation number:
//! 0 for tasks without dependencies, otherwise one more than the highest
//! generation among its dependencies. Generations are the scheduler's waves.
//!
//! Validation is pure and runs once per run, before any agent is invoked.

use crate::core::context::INITIAL_INPUT_KEY;
use crate::core::task::TaskDef;
use crate::error::ConfigError;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// A validated, acyclic task graph.
///
/// Edges point from a dependency to its dependent: `from` must complete
/// before `to` can start.
#[derive(Clone)]
pub struct TaskGraph {
    graph: DiGraph<TaskDef, ()>,
    task_index: HashMap<String, NodeIndex>,
    generations: HashMap<String, usize>,
    /// Tasks in definition order.
    order: Vec<String>,
}

impl TaskGraph {
    /// Validate task definitions and build the graph.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if:
    /// - two tasks share a name
    /// - a `depends_on` entry names a task that does not exist
    /// - two tasks write the same `output_key`, or a task writes the reserved initial-input key
    /// - the dependencies form a cycle (the error carries the full cycle path)
    /// - an `input_key` is neither the initial input nor written by an upstream task
    pub fn build(defs: &[TaskDef]) -> Result<Self, ConfigError> {
        let mut graph = DiGraph::new();
        let mut task_index = HashMap::new();
        let mut order = Vec::with_capacity(defs.len());

        for def in defs {
            if task_index.contains_key(&def.name) {
                return Err(ConfigError::DuplicateTask(def.name.clone()));
            }
            let index = graph.add_node(def.clone());
            task_index.insert(def.name.clone(), index);
            order.push(def.name.clone());
        }

        for def in defs {
            for dep in &def.depends_on {
                if !task_index.contains_key(dep) {
                    return Err(ConfigError::DanglingDependency {
                        task: def.name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        check_output_keys(defs)?;

        if let Some(path) = find_cycle(defs) {
            return Err(ConfigError::Cycle { path });
        }

        for def in defs {
            let to = task_index[&def.name];
            for dep in &def.depends_on {
                // update_edge keeps repeated depends_on entries to a single edge
                graph.update_edge(task_index[dep], to, ());
            }
        }

        let generations = compute_generations(&graph)?;

        let dag = Self {
            graph,
            task_index,
            generations,
            order,
        };
        dag.check_input_keys()?;
        Ok(dag)
    }

    /// Get a task definition by name.
    pub fn task(&self, name: &str) -> Option<&TaskDef> {
        self.task_index
            .get(name)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Generation (wave) number of a task.
    pub fn generation(&self, name: &str) -> Option<usize> {
        self.generations.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of distinct dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of waves.
    pub fn wave_count(&self) -> usize {
        self.generations.values().max().map(|g| g + 1).unwrap_or(0)
    }

    /// All tasks in definition order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDef> {
        self.order.iter().filter_map(|name| self.task(name))
    }

    /// Tasks grouped by generation, ascending. Names are sorted inside a wave.
    pub fn waves(&self) -> Vec<Vec<&TaskDef>> {
        let mut waves: Vec<Vec<&TaskDef>> = vec![Vec::new(); self.wave_count()];
        for def in self.tasks() {
            waves[self.generations[&def.name]].push(def);
        }
        for wave in &mut waves {
            wave.sort_by(|a, b| a.name.cmp(&b.name));
        }
        waves
    }

    /// Direct dependencies of a task.
    pub fn dependencies(&self, name: &str) -> Vec<&TaskDef> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Tasks that directly depend on a task.
    pub fn dependents(&self, name: &str) -> Vec<&TaskDef> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// All transitive dependencies of a task.
    pub fn ancestors(&self, name: &str) -> Vec<&TaskDef> {
        let Some(&start) = self.task_index.get(name) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        let mut result = Vec::new();
        while let Some(index) = stack.pop() {
            for dep in self.graph.neighbors_directed(index, Direction::Incoming) {
                if seen.insert(dep) {
                    result.push(&self.graph[dep]);
                    stack.push(dep);
                }
            }
        }
        result
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&TaskDef> {
        match self.task_index.get(name) {
            Some(&index) => {
                let mut found: Vec<&TaskDef> = self
                    .graph
                    .neighbors_directed(index, direction)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect();
                found.sort_by(|a, b| a.name.cmp(&b.name));
                found
            }
            None => Vec::new(),
        }
    }

    fn check_input_keys(&self) -> Result<(), ConfigError> {
        for def in self.tasks() {
            let Some(key) = def.input_key.as_deref() else {
                continue;
            };
            if key == INITIAL_INPUT_KEY {
                continue;
            }
            let reachable = self
                .ancestors(&def.name)
                .iter()
                .any(|ancestor| ancestor.output_key == key);
            if !reachable {
                return Err(ConfigError::UnreachableInputKey {
                    task: def.name.clone(),
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .field("waves", &self.wave_count())
            .finish()
    }
}

fn check_output_keys(defs: &[TaskDef]) -> Result<(), ConfigError> {
    let mut writers: HashMap<&str, &str> = HashMap::new();
    for def in defs {
        if def.output_key == INITIAL_INPUT_KEY {
            return Err(ConfigError::ReservedOutputKey {
                task: def.name.clone(),
                key: def.output_key.clone(),
            });
        }
        if let Some(first) = writers.insert(&def.output_key, &def.name) {
            return Err(ConfigError::DuplicateOutputKey {
                key: def.output_key.clone(),
                first: first.to_string(),
                second: def.name.clone(),
            });
        }
    }
    Ok(())
}

/// Depth-first search along `depends_on` with a recursion stack.
///
/// Returns the cycle as an ordered list of names whose first and last
/// entries are the same task, e.g. `[a, b, a]`.
fn find_cycle(defs: &[TaskDef]) -> Option<Vec<String>> {
    let by_name: HashMap<&str, &TaskDef> = defs.iter().map(|d| (d.name.as_str(), d)).collect();
    let mut done: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a TaskDef>,
        done: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|&n| n == name) {
            let mut path: Vec<String> = stack[pos..].iter().map(|n| n.to_string()).collect();
            path.push(name.to_string());
            return Some(path);
        }
        if done.contains(name) {
            return None;
        }
        stack.push(name);
        if let Some(&def) = by_name.get(name) {
            for dep in &def.depends_on {
                if let Some(path) = visit(dep, by_name, done, stack) {
                    return Some(path);
                }
            }
        }
        stack.pop();
        done.insert(name);
        None
    }

    defs.iter()
        .find_map(|def| visit(&def.name, &by_name, &mut done, &mut stack))
}

fn compute_generations(graph: &DiGraph<TaskDef, ()>) -> Result<HashMap<String, usize>, ConfigError> {
    let sorted = toposort(graph, None).map_err(|cycle| ConfigError::Cycle {
        path: vec![graph[cycle.node_id()].name.clone()],
    })?;

    let mut by_index: HashMap<NodeIndex, usize> = HashMap::new();
    for index in sorted {
        let generation = graph
            .neighbors_directed(index, Direction::Incoming)
            .filter_map(|dep| by_index.get(&dep))
            .map(|g| g + 1)
            .max()
            .unwrap_or(0);
        by_index.insert(index, generation);
    }

    Ok(by_index
        .into_iter()
        .map(|(index, generation)| (graph[index].name.clone(), generation))
        .collect())
}
