//! Inference-backed agents: research, architecture, implementation, QA and review.
//!
//! Each variant pulls its payload out of the task input with
//! [`normalize::extract`], builds a prompt around it and hands it to the
//! backend. Backend failures surface as [`AgentError::Backend`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::normalize::{self, Expectation, ScalarPolicy};
use crate::backend::{GenerationSettings, InferenceBackend};
use crate::error::AgentError;
use crate::project::ArchitectStage;

const DEFAULT_TITLE: &str = "Untitled Project";

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#[ \t]+(.+?)[ \t]*$").expect("valid title regex"));

const RESEARCH: Expectation = Expectation::new(
    &["project_requirements", "requirements", "description", "input"],
    ScalarPolicy::Text,
);
const ARCHITECTURE: Expectation = Expectation::new(
    &[
        "project_specifications",
        "specifications",
        "specs",
        "requirements",
    ],
    ScalarPolicy::Text,
);
const TASK_PLANNING: Expectation =
    Expectation::new(&["architecture_plan", "architecture"], ScalarPolicy::Text);
const ENGINEERING: Expectation = Expectation::new(
    &[
        "engineer_tasks",
        "task_plan",
        "revision_plan",
        "test_results",
        "architecture_plan",
    ],
    ScalarPolicy::Text,
);
const QA: Expectation = Expectation::new(
    &["integrated_system", "implementation", "fixed_system"],
    ScalarPolicy::Text,
);
const REVIEW: Expectation = Expectation::new(
    &[
        "documentation",
        "revised_system",
        "integrated_fixes",
        "implementation",
    ],
    ScalarPolicy::Text,
);
const TITLE: Expectation = Expectation::new(&["project_title"], ScalarPolicy::Reject);

/// Which part of a system a reviewer concentrates on, derived from its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFocus {
    Backend,
    Frontend,
    Infrastructure,
    General,
}

impl ReviewFocus {
    pub fn from_role(role: &str) -> Self {
        let role = role.to_lowercase();
        if role.contains("backend") {
            ReviewFocus::Backend
        } else if role.contains("frontend") {
            ReviewFocus::Frontend
        } else if role.contains("infrastructure") {
            ReviewFocus::Infrastructure
        } else {
            ReviewFocus::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewFocus::Backend => "backend",
            ReviewFocus::Frontend => "frontend",
            ReviewFocus::Infrastructure => "infrastructure",
            ReviewFocus::General => "general",
        }
    }
}

/// Everything a generative variant needs to call the backend.
pub struct Generator<'a> {
    pub agent: &'a str,
    pub backend: &'a dyn InferenceBackend,
    pub system_prompt: &'a str,
    pub settings: &'a GenerationSettings,
}

impl Generator<'_> {
    async fn generate(&self, prompt: &str) -> Result<String, AgentError> {
        debug!(agent = self.agent, backend = self.backend.name(), "generating");
        self.backend
            .generate(prompt, self.system_prompt, self.settings)
            .await
            .map_err(|source| AgentError::Backend {
                agent: self.agent.to_string(),
                source,
            })
    }
}

/// Title of a document: its first markdown `# heading`.
pub fn extract_title(text: &str) -> String {
    TITLE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

fn carried_title(input: &Value) -> Option<Value> {
    normalize::extract("", input, &TITLE)
        .ok()
        .map(|found| found.value.clone())
}

fn with_title(mut output: Value, input: &Value) -> Value {
    if let (Some(title), Value::Object(map)) = (carried_title(input), &mut output) {
        map.insert("project_title".into(), title);
    }
    output
}

pub async fn research(gen: &Generator<'_>, input: &Value) -> Result<Value, AgentError> {
    let requirements = normalize::extract(gen.agent, input, &RESEARCH)?.as_text();
    let prompt = format!(
        "# Project Requirements\n{requirements}\n\n\
         # Task\n\
         Analyze these requirements and prepare detailed specifications including:\n\
         - Project overview and goals\n\
         - Functional requirements\n\
         - Non-functional requirements (performance, security, scalability)\n\
         - Technical challenges and potential approaches\n\
         - Required technologies and components\n\
         - Assumptions and constraints\n\n\
         Format your response as a structured specification document that starts with a `# Title` heading."
    );
    let specifications = gen.generate(&prompt).await?;
    let title = extract_title(&specifications);
    Ok(json!({
        "project_specifications": specifications,
        "project_title": title,
    }))
}

pub async fn architect(
    gen: &Generator<'_>,
    stage: ArchitectStage,
    input: &Value,
) -> Result<Value, AgentError> {
    let output = match stage {
        ArchitectStage::Architecture => {
            let specs = normalize::extract(gen.agent, input, &ARCHITECTURE)?.as_text();
            let prompt = format!(
                "# Project Specifications\n{specs}\n\n\
                 # Task\n\
                 Design the system architecture: components and their responsibilities, \
                 data model, interfaces between components, technology choices and deployment.\n\n\
                 Format your response as a structured architecture document."
            );
            let plan = gen.generate(&prompt).await?;
            json!({ "architecture_plan": plan })
        }
        ArchitectStage::TaskPlanning => {
            let plan = normalize::extract(gen.agent, input, &TASK_PLANNING)?.as_text();
            let prompt = format!(
                "# Architecture Plan\n{plan}\n\n\
                 # Task\n\
                 Break this architecture into implementation tasks grouped by specialty \
                 (backend, frontend, infrastructure). For each task give a description, \
                 dependencies and acceptance criteria.\n\n\
                 Format your response as a structured task plan."
            );
            let task_plan = gen.generate(&prompt).await?;
            json!({ "task_plan": task_plan })
        }
    };
    Ok(with_title(output, input))
}

pub async fn engineer(
    gen: &Generator<'_>,
    specialty: &str,
    input: &Value,
) -> Result<Value, AgentError> {
    let found = normalize::extract(gen.agent, input, &ENGINEERING)?;
    // engineer_tasks may be split per specialty.
    let tasks = match (found.key(), found.value) {
        (Some("engineer_tasks"), Value::Object(by_specialty)) => by_specialty
            .get(specialty)
            .map(normalize::value_text)
            .unwrap_or_else(|| found.as_text()),
        _ => found.as_text(),
    };
    let prompt = format!(
        "# Assigned Work ({specialty})\n{tasks}\n\n\
         # Task\n\
         As a {specialty} software engineer, implement the work above. Provide the source \
         files with their paths, explain key decisions and list anything left unfinished."
    );
    let implementation = gen.generate(&prompt).await?;
    Ok(with_title(
        json!({ "implementation": implementation, "specialty": specialty }),
        input,
    ))
}

pub async fn qa(gen: &Generator<'_>, input: &Value) -> Result<Value, AgentError> {
    let found = normalize::extract(gen.agent, input, &QA)?;
    let system = found.as_text();
    if found.key() == Some("fixed_system") {
        let prompt = format!(
            "# System\n{system}\n\n\
             # Task\n\
             Write user and developer documentation for this system: setup, usage, \
             configuration and known limitations."
        );
        let documentation = gen.generate(&prompt).await?;
        return Ok(with_title(json!({ "documentation": documentation }), input));
    }
    let prompt = format!(
        "# System Under Test\n{system}\n\n\
         # Task\n\
         Write a test plan and test cases for this system, then report which cases \
         would fail and why. Finish with a list of defects ordered by severity."
    );
    let test_results = gen.generate(&prompt).await?;
    Ok(with_title(json!({ "test_results": test_results }), input))
}

/// Verdict from a review text. Rejection wins over approval.
pub fn approved(review: &str) -> bool {
    let lower = review.to_lowercase();
    if lower.contains("rejected") || lower.contains("not approved") {
        return false;
    }
    lower.contains("approved")
}

pub async fn review(
    gen: &Generator<'_>,
    focus: ReviewFocus,
    input: &Value,
) -> Result<Value, AgentError> {
    let subject = normalize::extract(gen.agent, input, &REVIEW)?.as_text();
    let prompt = format!(
        "# Material Under Review\n{subject}\n\n\
         # Task\n\
         Review this work focusing on {focus} concerns: correctness, maintainability, \
         security and completeness against the requirements. End with a verdict line: \
         APPROVED, CONDITIONALLY APPROVED or REJECTED.",
        focus = focus.as_str()
    );
    let review = gen.generate(&prompt).await?;
    let approved = approved(&review);
    Ok(with_title(
        json!({ "review": review, "focus": focus, "approved": approved }),
        input,
    ))
}

/// System prompt used when an agent definition does not set one.
pub fn default_system_prompt(role: &str) -> String {
    if role.is_empty() {
        "You are a helpful assistant on a software project team.".to_string()
    } else {
        format!("You are a {role} on a software project team.")
    }
}
