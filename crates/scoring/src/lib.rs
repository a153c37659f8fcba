//! Answer extraction and checking for free-text model output.

#![warn(missing_docs)]

pub mod scorer;

pub use scorer::{check_answer, extract_number, round_sig, Scorer};
