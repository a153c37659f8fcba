//! Configuration loaded from `mathprompt.toml`.
//!
//! Every section is optional; missing keys fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{FramingStyle, Pricing};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mathprompt.toml";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path
        path: PathBuf,
        /// Underlying TOML error
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prompt framing presented to the agent and the model
    pub framing: FramingStyle,
    /// Log file locations
    pub paths: PathsConfig,
    /// Inference backend
    pub model: ModelConfig,
    /// Optimizing agent
    pub agent: AgentConfig,
    /// Problem counts and the held-out seed
    pub problems: ProblemsConfig,
    /// Session loop limits
    pub runner: RunnerConfig,
    /// Answer extraction and comparison
    pub scoring: ScoringConfig,
    /// Prompt text overrides
    pub prompts: PromptsConfig,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, `mathprompt.toml` in the
    /// working directory is used if present, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from_path(default_path)?
                } else {
                    debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Config::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text (no validation).
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("problems.train_count", self.problems.train_count as u64),
            ("problems.test_count", self.problems.test_count as u64),
            ("runner.max_sessions", self.runner.max_sessions as u64),
            ("runner.max_tool_calls", self.runner.max_tool_calls as u64),
            ("runner.max_retries", self.runner.max_retries as u64),
            ("runner.session_timeout_secs", self.runner.session_timeout_secs),
            ("model.max_tokens", self.model.max_tokens as u64),
            ("model.batch_concurrency", self.model.batch_concurrency as u64),
            ("agent.max_tokens_per_turn", self.agent.max_tokens_per_turn as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }

        match self.scoring.policy {
            ScoringPolicy::Tolerance { tolerance } if tolerance.is_nan() || tolerance <= 0.0 => Err(ConfigError::Invalid(
                "scoring.policy.tolerance must be positive".to_string(),
            )),
            ScoringPolicy::SignificantFigures { digits } if digits == 0 => Err(ConfigError::Invalid(
                "scoring.policy.digits must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// The resolved agent API key, if the configured variable is set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.agent.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Log file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding every log and the pid file
    pub logs_dir: PathBuf,
}

impl PathsConfig {
    /// Training evaluation log.
    pub fn eval_log(&self) -> PathBuf {
        self.logs_dir.join("evaluations.jsonl")
    }

    /// Held-out evaluation log.
    pub fn test_log(&self) -> PathBuf {
        self.logs_dir.join("test_results.jsonl")
    }

    /// Session summary log.
    pub fn session_log(&self) -> PathBuf {
        self.logs_dir.join("sessions.jsonl")
    }

    /// Output of the background runner.
    pub fn runner_log(&self) -> PathBuf {
        self.logs_dir.join("runner.log")
    }

    /// Pid of the background runner.
    pub fn pid_file(&self) -> PathBuf {
        self.logs_dir.join("runner.pid")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
        }
    }
}

/// Inference backend (Ollama) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Ollama base URL
    pub host: String,
    /// Model tag
    pub name: String,
    /// Completion length cap per question
    pub max_tokens: u32,
    /// Questions in flight at once during a batch
    pub batch_concurrency: usize,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            name: "qwen2.5:0.5b".to_string(),
            max_tokens: 256,
            batch_concurrency: 8,
            request_timeout_secs: 120,
        }
    }
}

/// Optimizing agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Messages API base URL
    pub api_url: String,
    /// Agent model id
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Output cap per agent turn
    pub max_tokens_per_turn: u32,
    /// Wait before retrying a rate-limited turn
    pub rate_limit_backoff_secs: u64,
    /// Per-million-token prices
    pub pricing: Pricing,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            api_key_env: "MATHS_PROMPT_API_KEY".to_string(),
            max_tokens_per_turn: 4096,
            rate_limit_backoff_secs: 60,
            pricing: Pricing::default(),
        }
    }
}

/// Problem counts and the held-out seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemsConfig {
    /// Problems per training evaluation
    pub train_count: usize,
    /// Problems in the held-out set
    pub test_count: usize,
    /// Seed of the held-out set
    pub test_seed: u64,
}

impl Default for ProblemsConfig {
    fn default() -> Self {
        Self {
            train_count: 80,
            test_count: 40,
            test_seed: 42,
        }
    }
}

/// Session loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Sessions per run
    pub max_sessions: u32,
    /// Hard cap on `evaluate_prompt` calls per session
    pub max_tool_calls: u32,
    /// Consecutive failed sessions before giving up
    pub max_retries: u32,
    /// Pause after a failed session
    pub retry_delay_secs: u64,
    /// Wall-clock limit per session
    pub session_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            max_tool_calls: 20,
            max_retries: 50,
            retry_delay_secs: 300,
            session_timeout_secs: 7200,
        }
    }
}

/// Answer extraction and comparison policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Which number counts as the answer
    pub extraction: ExtractionPolicy,
    /// How it is compared
    pub policy: ScoringPolicy,
}

/// Which number in the model output counts as the answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPolicy {
    /// First number in the output
    #[default]
    First,
    /// Last number in the output
    Last,
}

/// How an extracted number is compared with the expected answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// Integers must match exactly; other answers are compared after rounding
    /// both sides to `digits` significant figures.
    SignificantFigures {
        /// Significant figures kept on both sides
        digits: u32,
    },
    /// `|extracted - expected| <= tolerance`.
    Tolerance {
        /// Largest accepted absolute difference
        tolerance: f64,
    },
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        ScoringPolicy::SignificantFigures { digits: 3 }
    }
}

/// Prompt text overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Replaces the built-in optimizer system framing. `{model}` and
    /// `{train_count}` are substituted.
    pub system_template: Option<String>,
}
