//! Durable, append-only logs for the prompt optimizer.
//!
//! This crate provides a trait-based storage interface with a JSON Lines
//! implementation: one record per line, appended, never rewritten.

#![warn(missing_docs)]

pub mod trait_;
pub mod jsonl_storage;

pub use trait_::{best_of, BestPrompt, Storage, StorageError, Result};
pub use jsonl_storage::JsonlStorage;
