//! The scoring primitive shared by the optimizer tool, the MCP server and
//! the CLI held-out evaluation.

#![warn(missing_docs)]

mod evaluator;

pub use evaluator::{EvalError, Evaluator, Result};
