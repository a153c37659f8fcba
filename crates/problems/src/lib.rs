//! Arithmetic problem generation.
//!
//! Training problems come from a randomized expression-tree generator and are
//! never reproducible. The held-out set is seeded and covers categories the
//! training distribution never produces.

#![warn(missing_docs)]

pub mod generator;
pub mod held_out;

#[cfg(test)]
mod test_support;

pub use generator::{generate_problems, generate_problems_with};
pub use held_out::{generate_test_problems, generate_test_problems_seeded, DEFAULT_TEST_SEED};
