//! Configuration types for agentflow
//!
//! Configuration is layered with figment: built-in defaults, then
//! `agentflow.toml` in the working directory, then the file named by
//! `AGENTFLOW_CONFIG_PATH`, then `AGENTFLOW_`-prefixed environment variables
//! using `__` as the nesting separator (`AGENTFLOW_WORKFLOW__MAX_ITERATIONS=5`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AgentflowError, Result};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentflowConfig {
    /// Model service configuration
    pub llm: LLMProviderConfig,

    /// Workflow limits and defaults
    pub workflow: WorkflowConfig,

    /// Transport retry policy for the provider
    pub retry: RetrySettings,
}

/// LLM provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMProviderConfig {
    /// Provider type
    pub provider: LLMProviderKind,

    /// Model name
    pub model: String,

    /// API key (if needed, prefer env vars)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL (for custom endpoints, e.g., Ollama)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Sampling temperature (0.0-2.0)
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for LLMProviderConfig {
    fn default() -> Self {
        Self {
            provider: LLMProviderKind::OpenAI,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.0,
            max_tokens: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProviderKind {
    OpenAI,
    /// Ollama through its OpenAI-compatible endpoint
    Ollama,
}

/// Workflow limits and defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Evaluator-optimizer round cap
    pub max_iterations: usize,

    /// Extra attempts when a structured reply fails validation
    pub schema_retries: usize,

    /// Fan-out concurrency limit (`None` runs every item at once)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Document chunk size in characters
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            schema_retries: 2,
            max_concurrency: None,
            chunk_size: 5000,
            chunk_overlap: 500,
        }
    }
}

/// Transport retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Wrap the provider in a retrying decorator
    pub enabled: bool,

    /// Maximum attempts, including the first
    pub max_attempts: usize,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

impl AgentflowConfig {
    /// Load configuration from files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AgentflowConfig::default()))
            .merge(Toml::file("agentflow.toml"));

        if let Ok(path) = std::env::var("AGENTFLOW_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        Self::from_figment(figment.merge(Env::prefixed("AGENTFLOW_").split("__")))
    }

    /// Like [`load`](Self::load), with `path` as the config file layer in place
    /// of `AGENTFLOW_CONFIG_PATH`. Environment variables still override it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or invalid, or the merged
    /// configuration fails validation.
    pub fn load_with_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AgentflowError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        Self::from_figment(
            Figment::from(Serialized::defaults(AgentflowConfig::default()))
                .merge(Toml::file("agentflow.toml"))
                .merge(Toml::file(path))
                .merge(Env::prefixed("AGENTFLOW_").split("__")),
        )
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AgentflowError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        Self::from_figment(
            Figment::from(Serialized::defaults(AgentflowConfig::default())).merge(Toml::file(path)),
        )
    }

    /// Extract and validate from a prepared figment
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AgentflowConfig = figment.extract().map_err(|e| {
            AgentflowError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        let wf = &self.workflow;

        if wf.max_iterations == 0 {
            return Err(AgentflowError::Configuration(
                "workflow.max_iterations must be at least 1".to_string(),
            ));
        }

        if wf.chunk_size == 0 || wf.chunk_overlap >= wf.chunk_size {
            return Err(AgentflowError::Configuration(format!(
                "workflow.chunk_overlap ({}) must be smaller than workflow.chunk_size ({})",
                wf.chunk_overlap, wf.chunk_size
            )));
        }

        if wf.max_concurrency == Some(0) {
            return Err(AgentflowError::Configuration(
                "workflow.max_concurrency must be at least 1 when set".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(AgentflowError::Configuration(format!(
                "llm.temperature must be within 0.0..=2.0, got {}",
                self.llm.temperature
            )));
        }

        Ok(())
    }
}
