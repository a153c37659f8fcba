//! Storage trait abstraction.

use async_trait::async_trait;
use mathprompt_core::{EvaluationRecord, PromptFraming, SessionId, SessionRecord, TestEvaluationRecord};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The best-known prompt, derived from the evaluation log.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPrompt {
    /// Prompt that achieved the score.
    pub framing: PromptFraming,
    /// Training accuracy, in `[0, 1]`.
    pub accuracy: f64,
    /// Iteration of the winning evaluation.
    pub iteration: u64,
    /// Session that produced it.
    pub session: SessionId,
}

/// First record reaching the maximum accuracy. Later ties do not replace it.
pub fn best_of(records: &[EvaluationRecord]) -> Option<BestPrompt> {
    let mut best: Option<&EvaluationRecord> = None;
    for record in records {
        match best {
            Some(current) if record.accuracy <= current.accuracy => {}
            _ => best = Some(record),
        }
    }
    best.map(|r| BestPrompt {
        framing: r.framing.clone(),
        accuracy: r.accuracy,
        iteration: r.iteration,
        session: r.session,
    })
}

/// Storage abstraction for the optimizer logs.
///
/// Three independent append-only streams: training evaluations, held-out
/// evaluations and session summaries. Readers skip lines they cannot parse.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Append ===

    /// Append one training evaluation.
    async fn append_evaluation(&self, record: &EvaluationRecord) -> Result<()>;

    /// Append one held-out evaluation.
    async fn append_test_evaluation(&self, record: &TestEvaluationRecord) -> Result<()>;

    /// Append one session summary.
    async fn append_session(&self, record: &SessionRecord) -> Result<()>;

    // === Scan ===

    /// All training evaluations, in log order.
    async fn list_evaluations(&self) -> Result<Vec<EvaluationRecord>>;

    /// All held-out evaluations, in log order.
    async fn list_test_evaluations(&self) -> Result<Vec<TestEvaluationRecord>>;

    /// All session summaries, in log order.
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Delete every log.
    async fn clear(&self) -> Result<()>;

    // === Derived state ===

    /// Best-known prompt, recomputed from the log on every call.
    async fn best_evaluation(&self) -> Result<Option<BestPrompt>> {
        Ok(best_of(&self.list_evaluations().await?))
    }

    /// Highest iteration recorded, or 0 for an empty log.
    async fn last_iteration(&self) -> Result<u64> {
        Ok(self
            .list_evaluations()
            .await?
            .iter()
            .map(|r| r.iteration)
            .max()
            .unwrap_or(0))
    }

    /// Highest session id seen in either the evaluation or the session log.
    async fn last_session(&self) -> Result<Option<SessionId>> {
        let from_evals = self.list_evaluations().await?.into_iter().map(|r| r.session).max();
        let from_sessions = self.list_sessions().await?.into_iter().map(|r| r.session).max();
        Ok(from_evals.max(from_sessions))
    }
}
