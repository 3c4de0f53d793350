//! Agent dispatch.
//!
//! Every agent, built-in or custom, implements [`Dispatch`]. An agent only
//! ever sees the input the runner hands it; it never touches the execution
//! context, which is what lets same-wave tasks run concurrently.

pub mod arithmetic;
pub mod generative;
pub mod normalize;
pub mod verify;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::{GenerationSettings, InferenceBackend};
use crate::error::AgentError;
use crate::orchestration::journal::{Journal, LogKind};
use crate::project::{AgentDef, AgentType, ArchitectStage, ValidatedProject};

pub use arithmetic::NumberAdder;
pub use generative::ReviewFocus;
pub use verify::{Decision, DecisionSignal, StepRecord, VerificationOutcome};

/// What an agent hands back to the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    /// Stored verbatim at the task's output key.
    Value(Value),
    /// A continue/halt request. Also stored at the output key.
    Decision(DecisionSignal),
}

impl AgentOutput {
    pub fn decision(&self) -> Option<&DecisionSignal> {
        match self {
            AgentOutput::Decision(signal) => Some(signal),
            AgentOutput::Value(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            AgentOutput::Value(value) => value,
            AgentOutput::Decision(signal) => json!({
                "message": signal.message,
                "decision": signal.decision,
            }),
        }
    }
}

impl From<Value> for AgentOutput {
    fn from(value: Value) -> Self {
        AgentOutput::Value(value)
    }
}

#[async_trait]
pub trait Dispatch: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, input: Value, journal: &Journal) -> Result<AgentOutput, AgentError>;
}

/// The closed set of built-in agent behaviours.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentKind {
    ResearchAnalyst,
    Architect {
        stage: ArchitectStage,
    },
    SoftwareEngineer {
        specialty: String,
    },
    QaEngineer,
    Reviewer {
        focus: ReviewFocus,
    },
    NumberAdder(NumberAdder),
    /// Step verifier.
    Analyst,
    FeedbackProcessor,
    /// Passes its input through unchanged.
    Default,
}

impl AgentKind {
    pub fn from_def(def: &AgentDef) -> Self {
        match def.agent_type {
            AgentType::ResearchAnalyst => AgentKind::ResearchAnalyst,
            AgentType::Architect => AgentKind::Architect {
                stage: def.stage.unwrap_or_default(),
            },
            AgentType::SoftwareEngineer => AgentKind::SoftwareEngineer {
                specialty: def.specialty.clone().unwrap_or_default(),
            },
            AgentType::QaEngineer => AgentKind::QaEngineer,
            AgentType::Reviewer => AgentKind::Reviewer {
                focus: ReviewFocus::from_role(&def.role),
            },
            AgentType::NumberAdder => AgentKind::NumberAdder(NumberAdder {
                number_to_add: def.number_to_add.unwrap_or_default(),
                repetitions: def.repetitions.unwrap_or(1),
                trace_steps: def.trace_steps,
            }),
            AgentType::Analyst => AgentKind::Analyst,
            AgentType::FeedbackProcessor => AgentKind::FeedbackProcessor,
            AgentType::Default => AgentKind::Default,
        }
    }

    /// Whether this variant calls the inference backend.
    pub fn is_generative(&self) -> bool {
        matches!(
            self,
            AgentKind::ResearchAnalyst
                | AgentKind::Architect { .. }
                | AgentKind::SoftwareEngineer { .. }
                | AgentKind::QaEngineer
                | AgentKind::Reviewer { .. }
        )
    }
}

/// A built-in agent bound to an inference backend.
pub struct Agent {
    def: AgentDef,
    kind: AgentKind,
    backend: Arc<dyn InferenceBackend>,
    settings: GenerationSettings,
    system_prompt: String,
}

impl Agent {
    pub fn from_def(def: AgentDef, backend: Arc<dyn InferenceBackend>) -> Self {
        let kind = AgentKind::from_def(&def);
        let settings = GenerationSettings::from_parts(def.model.as_deref(), &def.settings);
        let system_prompt = def
            .system_prompt
            .clone()
            .unwrap_or_else(|| generative::default_system_prompt(&def.role));
        Self {
            def,
            kind,
            backend,
            settings,
            system_prompt,
        }
    }

    pub fn def(&self) -> &AgentDef {
        &self.def
    }

    pub fn kind(&self) -> &AgentKind {
        &self.kind
    }

    async fn run(&self, input: &Value) -> Result<AgentOutput, AgentError> {
        let name = self.def.name.as_str();
        let gen = generative::Generator {
            agent: name,
            backend: self.backend.as_ref(),
            system_prompt: &self.system_prompt,
            settings: &self.settings,
        };
        let value = match &self.kind {
            AgentKind::ResearchAnalyst => generative::research(&gen, input).await?,
            AgentKind::Architect { stage } => generative::architect(&gen, *stage, input).await?,
            AgentKind::SoftwareEngineer { specialty } => {
                generative::engineer(&gen, specialty, input).await?
            }
            AgentKind::QaEngineer => generative::qa(&gen, input).await?,
            AgentKind::Reviewer { focus } => generative::review(&gen, *focus, input).await?,
            AgentKind::NumberAdder(adder) => adder.apply(name, input)?,
            AgentKind::Analyst => verify::verify_input(name, input)?,
            AgentKind::FeedbackProcessor => {
                return verify::feedback(name, input).map(AgentOutput::Decision)
            }
            AgentKind::Default => input.clone(),
        };
        Ok(AgentOutput::Value(value))
    }
}

#[async_trait]
impl Dispatch for Agent {
    fn name(&self) -> &str {
        &self.def.name
    }

    async fn execute(&self, input: Value, journal: &Journal) -> Result<AgentOutput, AgentError> {
        let mut details = json!({
            "type": self.def.agent_type,
            "role": self.def.role,
        });
        if self.kind.is_generative() {
            details["backend"] = json!(self.backend.name());
            details["model"] = json!(self.settings.model);
        }
        journal.agent(&self.def.name, LogKind::Info, "executing", details);

        let output = self.run(&input).await?;
        if let Some(signal) = output.decision() {
            journal.agent(
                &self.def.name,
                LogKind::Info,
                if signal.is_halt() {
                    "decision: halt"
                } else {
                    "decision: continue"
                },
                json!({ "message": signal.message }),
            );
        }
        Ok(output)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.def.name)
            .field("kind", &self.kind)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Dispatchers by agent name.
#[derive(Clone, Default)]
pub struct AgentSet {
    agents: HashMap<String, Arc<dyn Dispatch>>,
}

impl AgentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in agents for every agent a project defines.
    pub fn from_project(project: &ValidatedProject, backend: Arc<dyn InferenceBackend>) -> Self {
        let mut set = Self::new();
        for def in project.agents() {
            set.insert(Agent::from_def(def.clone(), Arc::clone(&backend)));
        }
        set
    }

    /// Register a dispatcher under its own name, replacing any previous one.
    pub fn insert<D: Dispatch + 'static>(&mut self, agent: D) {
        self.insert_arc(Arc::new(agent));
    }

    pub fn insert_arc(&mut self, agent: Arc<dyn Dispatch>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Dispatch>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.agents.keys().collect();
        names.sort();
        f.debug_struct("AgentSet").field("agents", &names).finish()
    }
}
