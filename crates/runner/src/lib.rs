//! The outer optimization loop: sessions, retries, held-out checks and the
//! session log.

#![warn(missing_docs)]

pub mod engine;

pub use engine::{LoopConfig, LoopError, LoopExit, LoopReport, OptimizationLoop};
