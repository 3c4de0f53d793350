//! Ollama HTTP backend (`POST /api/generate`, non-streaming).

use super::{GenerationSettings, InferenceBackend};
use crate::config::BackendConfig;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    default_model: String,
    default_temperature: f64,
    default_max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    stream: bool,
    options: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    error: Option<String>,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            default_temperature: 0.7,
            default_max_tokens: None,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.model.clone(),
            default_temperature: config.temperature,
            default_max_tokens: config.max_tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn options(&self, settings: &GenerationSettings) -> Map<String, Value> {
        let mut options = settings.extra.clone();
        options.insert(
            "temperature".into(),
            Value::from(settings.temperature.unwrap_or(self.default_temperature)),
        );
        if let Some(max) = settings.max_tokens.or(self.default_max_tokens) {
            options.insert("num_predict".into(), Value::from(max));
        }
        options
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<String, BackendError> {
        let model = settings.model.as_deref().unwrap_or(&self.default_model);
        let body = GenerateRequest {
            model,
            prompt,
            system: system_prompt,
            stream: false,
            options: self.options(settings),
        };

        debug!(model, url = %self.base_url, prompt_len = prompt.len(), "ollama generate");

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(BackendError::RequestFailed(error));
        }
        parsed
            .response
            .ok_or_else(|| BackendError::InvalidResponse("missing 'response' field".into()))
    }
}
