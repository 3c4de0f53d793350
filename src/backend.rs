//! Inference backend abstraction.
//!
//! Agents that produce text hand a prompt, a system prompt and their
//! generation settings to an [`InferenceBackend`]. The engine treats any
//! error from this boundary as an agent execution failure.

mod ollama;

pub use ollama::{OllamaBackend, DEFAULT_BASE_URL};

use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-agent generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenerationSettings {
    /// Model name; `None` means the backend default.
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Backend-specific options passed through untouched.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl GenerationSettings {
    /// Build settings from an agent's model reference and free-form settings map.
    pub fn from_parts(model: Option<&str>, settings: &Map<String, Value>) -> Self {
        let mut extra = settings.clone();
        let temperature = extra.remove("temperature").and_then(|v| v.as_f64());
        let max_tokens = extra
            .remove("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v.min(u32::MAX as u64) as u32);
        Self {
            model: model.map(String::from),
            temperature,
            max_tokens,
            extra,
        }
    }
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<String, BackendError>;
}

/// Backend used when none is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackend;

#[async_trait]
impl InferenceBackend for NoBackend {
    fn name(&self) -> &str {
        "none"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _system_prompt: &str,
        _settings: &GenerationSettings,
    ) -> Result<String, BackendError> {
        Err(BackendError::Unavailable)
    }
}
