//! Configuration settings for the Consulta pipeline.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("consulta.toml"),
            dirs::config_dir()
                .map(|p| p.join("consulta/config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".consulta/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        if self.model.base_url.is_empty() {
            return Err(ConfigError::MissingField("model.base_url".to_string()).into());
        }
        if self.model.model.is_empty() {
            return Err(ConfigError::MissingField("model.model".to_string()).into());
        }
        if self.pipeline.max_rows == 0 {
            return Err(ConfigError::Invalid("pipeline.max_rows must be > 0".to_string()).into());
        }
        if !(0.0..=1.0).contains(&self.pipeline.fuzzy_threshold) {
            return Err(ConfigError::Invalid(
                "pipeline.fuzzy_threshold must be between 0.0 and 1.0".to_string(),
            )
            .into());
        }
        if self.pipeline.fuzzy_limit == 0 {
            return Err(ConfigError::Invalid("pipeline.fuzzy_limit must be > 0".to_string()).into());
        }
        Ok(())
    }
}

/// Text-generation service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the OpenAI-compatible chat API.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// API key (falls back to the `CONSULTA_API_KEY` env var).
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum tokens for a completion.
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 30,
            max_tokens: 1000,
        }
    }
}

/// Pipeline behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum re-synthesis attempts after an execution failure.
    pub max_retries: u32,
    /// Hard row cap applied to every synthesized query.
    pub max_rows: usize,
    /// Statement timeout for the relational store, in seconds.
    pub statement_timeout_secs: u64,
    /// Minimum trigram similarity for a fuzzy suggestion.
    pub fuzzy_threshold: f32,
    /// Maximum number of fuzzy suggestions.
    pub fuzzy_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_rows: 100,
            statement_timeout_secs: 10,
            fuzzy_threshold: 0.3,
            fuzzy_limit: 3,
        }
    }
}
