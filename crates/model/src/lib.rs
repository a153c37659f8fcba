//! Model query adapter: how candidate prompts reach the model under test.
//!
//! The [`ModelAdapter`] trait is the seam the evaluator depends on;
//! [`OllamaModel`] is the concrete backend.

#![warn(missing_docs)]

pub mod adapter;
pub mod ollama;

pub use adapter::{ModelAdapter, ModelError, Result};
pub use ollama::OllamaModel;
