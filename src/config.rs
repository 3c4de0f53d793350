use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::backend::DEFAULT_BASE_URL;
use crate::orchestration::RunnerConfig;
use crate::{Error, Result};

const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "llama3".to_string(),
            temperature: 0.7,
            max_tokens: Some(8192),
            request_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum agent calls in flight within a wave.
    pub max_concurrency: usize,
    /// Per agent call timeout.
    pub task_timeout_secs: u64,
    /// Stop scheduling later waves after any task failure.
    pub stop_on_failure: bool,
    pub backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            stop_on_failure: false,
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    pub fn mimi_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".mimi"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::mimi_dir()?.join("mimi.toml"))
    }

    /// Load `~/.mimi/mimi.toml`, falling back to defaults, then apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        let mut config = if path.exists() {
            toml::from_str(&fs::read_to_string(path)?)?
        } else {
            debug!("Config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        debug!(
            max_concurrency = config.max_concurrency,
            task_timeout_secs = config.task_timeout_secs,
            base_url = %config.backend.base_url,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let mimi_dir = Self::mimi_dir()?;
        if !mimi_dir.exists() {
            debug!(dir = %mimi_dir.display(), "Creating mimi directory");
            fs::create_dir_all(&mimi_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Apply `OLLAMA_BASE_URL`, `OLLAMA_TEMPERATURE` and `OLLAMA_TIMEOUT`.
    /// Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.backend.base_url = url;
        }
        if let Some(t) = lookup("OLLAMA_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.backend.temperature = t;
        }
        if let Some(secs) = lookup("OLLAMA_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.backend.request_timeout_secs = secs;
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            max_concurrency: self.max_concurrency.max(1),
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            stop_on_failure: self.stop_on_failure,
        }
    }
}
