//! Core data model for the prompt optimizer.
//!
//! Problems, the append-only log records, prompt framings, token usage and
//! configuration shared by every other crate in the workspace.

#![warn(missing_docs)]

mod id;
mod problem;
mod framing;
mod record;
mod usage;
pub mod config;

pub use id::SessionId;
pub use problem::{Problem, Category};
pub use framing::{PromptFraming, FramingStyle};
pub use record::{ProblemDetail, Score, EvaluationRecord, TestEvaluationRecord, SessionRecord};
pub use usage::{TokenUsage, Pricing};
pub use config::{
    Config, ConfigError, PathsConfig, ModelConfig, AgentConfig, ProblemsConfig, RunnerConfig,
    ScoringConfig, ScoringPolicy, ExtractionPolicy, PromptsConfig,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
