//! Project definitions: agents, tasks, and the validation that turns them
//! into something the runner can execute.
//!
//! A project file is TOML or JSON:
//!
//! ```toml
//! name = "adder"
//!
//! [[agents]]
//! name = "add-one"
//! type = "number_adder"
//! number_to_add = 1
//!
//! [[tasks]]
//! name = "t1"
//! agent = "add-one"
//! output_key = "r1"
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::agent::arithmetic::MAX_REPETITIONS;
use crate::core::dag::TaskGraph;
use crate::core::task::TaskDef;
use crate::error::{ConfigError, Error, Result};

/// Variant tag of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    ResearchAnalyst,
    Architect,
    SoftwareEngineer,
    QaEngineer,
    Reviewer,
    NumberAdder,
    /// Step verifier.
    Analyst,
    FeedbackProcessor,
    #[default]
    Default,
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentType::ResearchAnalyst => "research_analyst",
            AgentType::Architect => "architect",
            AgentType::SoftwareEngineer => "software_engineer",
            AgentType::QaEngineer => "qa_engineer",
            AgentType::Reviewer => "reviewer",
            AgentType::NumberAdder => "number_adder",
            AgentType::Analyst => "analyst",
            AgentType::FeedbackProcessor => "feedback_processor",
            AgentType::Default => "default",
        };
        write!(f, "{}", s)
    }
}

/// Which planning step an architect agent performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArchitectStage {
    #[default]
    Architecture,
    TaskPlanning,
}

/// Static definition of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub agent_type: AgentType,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    /// Model reference handed to the inference backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub settings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    // Type-specific parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_to_add: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub trace_steps: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ArchitectStage>,
}

impl AgentDef {
    pub fn new(name: &str, agent_type: AgentType) -> Self {
        Self {
            name: name.to_string(),
            agent_type,
            role: String::new(),
            description: String::new(),
            model: None,
            settings: Map::new(),
            system_prompt: None,
            number_to_add: None,
            repetitions: None,
            trace_steps: false,
            specialty: None,
            stage: None,
        }
    }

    /// A numeric-step agent adding `number` once per repetition.
    pub fn adder(name: &str, number: i64) -> Self {
        let mut def = Self::new(name, AgentType::NumberAdder);
        def.number_to_add = Some(number);
        def
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }
}

/// A project as read from disk: unvalidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agents: Vec<AgentDef>,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent: AgentDef) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_task(mut self, task: TaskDef) -> Self {
        self.tasks.push(task);
        self
    }

    /// Load a project from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Project::load");
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            other => Err(Error::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Validate agents and the task graph.
    pub fn validate(self) -> std::result::Result<ValidatedProject, ConfigError> {
        ValidatedProject::new(self)
    }
}

/// A project whose agents and task graph have passed validation.
#[derive(Debug)]
pub struct ValidatedProject {
    name: String,
    description: String,
    agents: HashMap<String, AgentDef>,
    graph: TaskGraph,
}

impl ValidatedProject {
    pub fn new(project: Project) -> std::result::Result<Self, ConfigError> {
        let mut agents = HashMap::new();
        for agent in project.agents {
            validate_agent(&agent)?;
            if agents.contains_key(&agent.name) {
                return Err(ConfigError::DuplicateAgent(agent.name));
            }
            agents.insert(agent.name.clone(), agent);
        }

        for task in &project.tasks {
            if !agents.contains_key(&task.agent) {
                return Err(ConfigError::UnknownAgent {
                    task: task.name.clone(),
                    agent: task.agent.clone(),
                });
            }
        }

        let graph = TaskGraph::build(&project.tasks)?;
        debug!(
            project = %project.name,
            tasks = graph.len(),
            waves = graph.wave_count(),
            "project validated"
        );

        Ok(Self {
            name: project.name,
            description: project.description,
            agents,
            graph,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn agent(&self, name: &str) -> Option<&AgentDef> {
        self.agents.get(name)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentDef> {
        self.agents.values()
    }
}

fn validate_agent(agent: &AgentDef) -> std::result::Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAgent {
        agent: agent.name.clone(),
        reason: reason.to_string(),
    };
    match agent.agent_type {
        AgentType::NumberAdder => {
            if agent.number_to_add.is_none() {
                return Err(invalid("number_adder requires number_to_add"));
            }
            match agent.repetitions {
                Some(0) => return Err(invalid("repetitions must be at least 1")),
                Some(n) if n > MAX_REPETITIONS => {
                    return Err(invalid(&format!(
                        "repetitions must be at most {}",
                        MAX_REPETITIONS
                    )))
                }
                _ => {}
            }
        }
        AgentType::SoftwareEngineer => {
            if agent.specialty.as_deref().map_or(true, str::is_empty) {
                return Err(invalid("software_engineer requires a specialty"));
            }
        }
        _ => {}
    }
    Ok(())
}
