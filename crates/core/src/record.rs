//! Append-only log records.

use serde::{Deserialize, Serialize};

use crate::{Category, Problem, PromptFraming, SessionId, Time, TokenUsage};

/// Outcome of one problem within an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDetail {
    /// Problem category
    pub category: Category,
    /// Expression text
    pub question: String,
    /// Exact answer
    pub answer: f64,
    /// Raw model output
    pub model_response: String,
    /// Number pulled from the output, if any
    pub extracted: Option<f64>,
    /// Whether it matched
    pub correct: bool,
}

impl ProblemDetail {
    /// Build the detail row for a scored problem.
    pub fn new(problem: &Problem, model_response: String, extracted: Option<f64>, correct: bool) -> Self {
        Self {
            category: problem.category,
            question: problem.question.clone(),
            answer: problem.answer,
            model_response,
            extracted,
            correct,
        }
    }
}

/// Aggregate score of one evaluation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Problems scored
    pub num_problems: usize,
    /// Problems answered correctly
    pub num_correct: usize,
    /// `num_correct / num_problems`
    pub accuracy: f64,
}

impl Score {
    /// Score a list of detail rows. `accuracy` is the unrounded ratio.
    pub fn from_details(details: &[ProblemDetail]) -> Self {
        let num_problems = details.len();
        let num_correct = details.iter().filter(|d| d.correct).count();
        let accuracy = if num_problems == 0 {
            0.0
        } else {
            num_correct as f64 / num_problems as f64
        };
        Self {
            num_problems,
            num_correct,
            accuracy,
        }
    }
}

/// The only text the optimizing agent ever sees for an evaluation.
impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Accuracy: {:.1}% ({}/{} correct)",
            self.accuracy * 100.0,
            self.num_correct,
            self.num_problems
        )
    }
}

/// One training evaluation, as appended to `evaluations.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// When the evaluation finished
    pub timestamp: Time,
    /// Process-wide evaluation counter
    pub iteration: u64,
    /// Session that asked for it
    pub session: SessionId,
    /// Prompt under test
    #[serde(flatten)]
    pub framing: PromptFraming,
    /// Problems scored
    pub num_problems: usize,
    /// Problems answered correctly
    pub num_correct: usize,
    /// `num_correct / num_problems`
    pub accuracy: f64,
    /// Per-problem detail
    pub problems: Vec<ProblemDetail>,
}

impl EvaluationRecord {
    /// Build a record; counts and accuracy are derived from `problems`.
    pub fn new(iteration: u64, session: SessionId, framing: PromptFraming, problems: Vec<ProblemDetail>) -> Self {
        let score = Score::from_details(&problems);
        Self {
            timestamp: chrono::Utc::now(),
            iteration,
            session,
            framing,
            num_problems: score.num_problems,
            num_correct: score.num_correct,
            accuracy: score.accuracy,
            problems,
        }
    }

    /// Aggregate score of this record.
    pub fn score(&self) -> Score {
        Score {
            num_problems: self.num_problems,
            num_correct: self.num_correct,
            accuracy: self.accuracy,
        }
    }
}

/// One held-out evaluation, as appended to `test_results.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEvaluationRecord {
    /// When the evaluation finished
    pub timestamp: Time,
    /// Prompt under test
    #[serde(flatten)]
    pub framing: PromptFraming,
    /// Problems scored
    pub num_problems: usize,
    /// Problems answered correctly
    pub num_correct: usize,
    /// `num_correct / num_problems`
    pub accuracy: f64,
    /// Per-problem detail
    pub problems: Vec<ProblemDetail>,
}

impl TestEvaluationRecord {
    /// Build a record; counts and accuracy are derived from `problems`.
    pub fn new(framing: PromptFraming, problems: Vec<ProblemDetail>) -> Self {
        let score = Score::from_details(&problems);
        Self {
            timestamp: chrono::Utc::now(),
            framing,
            num_problems: score.num_problems,
            num_correct: score.num_correct,
            accuracy: score.accuracy,
            problems,
        }
    }

    /// Aggregate score of this record.
    pub fn score(&self) -> Score {
        Score {
            num_problems: self.num_problems,
            num_correct: self.num_correct,
            accuracy: self.accuracy,
        }
    }
}

/// Summary of one optimizer session, as appended to `sessions.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// When the session ended
    pub timestamp: Time,
    /// Session number
    pub session: SessionId,
    /// Finished cleanly
    pub success: bool,
    /// `evaluate_prompt` calls made
    pub tool_calls_made: u32,
    /// Tokens across every turn
    #[serde(flatten)]
    pub usage: TokenUsage,
    /// Cost under the configured pricing
    pub estimated_cost_usd: f64,
    /// Held-out accuracy of the best prompt after the session
    pub test_accuracy: Option<f64>,
}
