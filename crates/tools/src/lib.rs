//! Tools exposed to the optimizing agent.
//!
//! There is exactly one: `evaluate_prompt`, which scores a candidate prompt
//! and answers with the accuracy line only.

#![warn(missing_docs)]

pub mod r#trait;
pub mod evaluate;

pub use r#trait::{Parameter, Tool, ToolError, ToolSchema, Toolbox};
pub use evaluate::{EvaluatePromptTool, EVALUATE_PROMPT};
