//! Scoreloop configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::highlight::MarkupStyle;
use crate::retry::RetryPolicy;
use crate::roles::{PipelineMode, RoleDefinition, RoleRoster};
use crate::score::MAX_SCORE;

/// Configuration problems that must stop the loop from starting
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{purpose} API key not found. Set the {var} environment variable.")]
    MissingCredential { var: String, purpose: &'static str },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main Scoreloop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Convergence loop settings
    #[serde(rename = "loop")]
    pub loop_settings: LoopSettings,

    /// Role pipeline shape
    pub pipeline: PipelineConfig,

    /// Web search for research roles
    pub search: SearchConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before any round starts
    ///
    /// Checks that required environment variables are set and loop bounds
    /// make sense. Call this early to fail fast with a clear message.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.provider != "openai" {
            return Err(ConfigError::Invalid(format!(
                "unknown LLM provider '{}', supported: openai",
                self.llm.provider
            )));
        }
        self.llm.api_key()?;

        if self.search.enabled && std::env::var(&self.search.api_key_env).is_err() {
            return Err(ConfigError::MissingCredential {
                var: self.search.api_key_env.clone(),
                purpose: "Search",
            });
        }

        if self.loop_settings.target_score > MAX_SCORE {
            return Err(ConfigError::Invalid(format!(
                "target-score {} is above {}",
                self.loop_settings.target_score, MAX_SCORE
            )));
        }
        if self.loop_settings.max_rounds == 0 {
            return Err(ConfigError::Invalid("max-rounds must be at least 1".to_string()));
        }

        let roster = self.pipeline.roster();
        if roster.roles.is_empty() {
            return Err(ConfigError::Invalid("pipeline has no roles".to_string()));
        }
        if roster.get(&roster.score_role).is_none() {
            return Err(ConfigError::Invalid(format!(
                "score-role '{}' is not one of the pipeline roles",
                roster.score_role
            )));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .scoreloop.yml
        let local_config = PathBuf::from(".scoreloop.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/scoreloop/scoreloop.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Errors are swallowed: a broken config file is reported by the full
    /// load once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => std::iter::once(PathBuf::from(".scoreloop.yml"))
                .chain(Self::user_config_path())
                .collect(),
        };
        candidates
            .into_iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(&p).ok())
            .and_then(|config| config.log_level)
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("scoreloop").join("scoreloop.yml"))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "openai" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env).map_err(|_| ConfigError::MissingCredential {
            var: self.api_key_env.clone(),
            purpose: "LLM",
        })
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com".to_string(),
            max_tokens: 1200,
            timeout_ms: 120_000,
            temperature: Some(0.7),
        }
    }
}

/// Convergence loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Verified score that ends the loop
    #[serde(rename = "target-score")]
    pub target_score: u8,

    /// Round budget
    #[serde(rename = "max-rounds")]
    pub max_rounds: u32,

    /// Highlight renderer for tracked roles
    pub markup: MarkupStyle,

    /// Retries for one pipeline invocation
    pub retry: RetryPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            target_score: 10,
            max_rounds: 5,
            markup: MarkupStyle::Plain,
            retry: RetryPolicy::default(),
        }
    }
}

/// Role pipeline shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// One completion per role, or one sectioned completion per round
    pub mode: PipelineMode,

    /// Replaces the built-in roles for the mode when non-empty
    pub roles: Vec<RoleDefinition>,

    #[serde(rename = "score-role")]
    pub score_role: Option<String>,

    #[serde(rename = "review-role")]
    pub review_role: Option<String>,

    #[serde(rename = "content-role")]
    pub content_role: Option<String>,

    #[serde(rename = "summary-role")]
    pub summary_role: Option<String>,
}

impl PipelineConfig {
    /// Built-in roster for the mode with any configured overrides applied
    pub fn roster(&self) -> RoleRoster {
        let mut roster = RoleRoster::for_mode(self.mode);
        if !self.roles.is_empty() {
            roster.roles = self.roles.clone();
        }
        if let Some(role) = &self.score_role {
            roster.score_role = role.clone();
        }
        if let Some(role) = &self.review_role {
            roster.review_role = Some(role.clone());
        }
        if let Some(role) = &self.content_role {
            roster.content_role = role.clone();
        }
        if let Some(role) = &self.summary_role {
            roster.summary_role = Some(role.clone());
        }
        roster
    }
}

/// Web search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Ground research roles in live search results
    pub enabled: bool,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Results per query
    #[serde(rename = "max-results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key_env: "TAVILY_API_KEY".to_string(),
            base_url: "https://api.tavily.com".to_string(),
            max_results: 5,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database for published posts
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/scoreloop on Linux)
        let database = dirs::data_dir()
            .map(|d| d.join("scoreloop"))
            .unwrap_or_else(|| PathBuf::from(".scoreloop"))
            .join("content.db");

        Self { database }
    }
}
