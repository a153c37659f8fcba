//! Evaluator: run a candidate prompt over a batch of problems, score every
//! answer and append the full trace to the log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mathprompt_core::{
    Config, EvaluationRecord, Problem, ProblemDetail, PromptFraming, Score, SessionId,
    TestEvaluationRecord,
};
use mathprompt_model::{ModelAdapter, ModelError};
use mathprompt_problems::{generate_problems, generate_test_problems_seeded};
use mathprompt_scoring::Scorer;
use mathprompt_storage::{Storage, StorageError};
use tracing::{debug, info, warn};

/// Result type for evaluations.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Evaluation failures.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// The model backend failed; the evaluation is lost but the run can go on.
    #[error("model query failed: {0}")]
    Model(#[from] ModelError),

    /// The log could not be read or written.
    #[error("evaluation log failure: {0}")]
    Storage(#[from] StorageError),
}

impl EvalError {
    /// Log failures stop the whole optimization loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::Storage(_))
    }
}

/// Scores candidate prompts against fresh training problems or the fixed
/// held-out set.
///
/// Owns the iteration counter. It starts from the highest iteration in the
/// evaluation log, so numbering survives restarts; it assumes a single writer.
pub struct Evaluator {
    storage: Arc<dyn Storage>,
    model: Arc<dyn ModelAdapter>,
    scorer: Scorer,
    train_count: usize,
    test_count: usize,
    test_seed: u64,
    iteration: AtomicU64,
}

impl Evaluator {
    /// Create an evaluator, recovering the iteration counter from the log.
    pub async fn new(storage: Arc<dyn Storage>, model: Arc<dyn ModelAdapter>, config: &Config) -> Result<Self> {
        let last = storage.last_iteration().await?;
        debug!("Resuming evaluation numbering after iteration {}", last);
        Ok(Self {
            storage,
            model,
            scorer: Scorer::new(config.scoring),
            train_count: config.problems.train_count,
            test_count: config.problems.test_count,
            test_seed: config.problems.test_seed,
            iteration: AtomicU64::new(last),
        })
    }

    /// The most recently issued iteration number.
    pub fn last_iteration(&self) -> u64 {
        self.iteration.load(Ordering::SeqCst)
    }

    /// The log this evaluator appends to.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Score `framing` on freshly generated training problems and append an
    /// [`EvaluationRecord`]. Only the aggregate comes back.
    pub async fn evaluate(&self, framing: &PromptFraming, session: SessionId) -> Result<Score> {
        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;
        let problems = generate_problems(self.train_count);

        let details = self.score_problems(framing, &problems).await?;
        let record = EvaluationRecord::new(iteration, session, framing.clone(), details);
        self.storage.append_evaluation(&record).await?;

        let score = record.score();
        info!(iteration, session = %session, "{}", score);
        Ok(score)
    }

    /// Score `framing` on the seeded held-out set and append a
    /// [`TestEvaluationRecord`].
    pub async fn evaluate_held_out(&self, framing: &PromptFraming) -> Result<Score> {
        let problems = generate_test_problems_seeded(self.test_count, self.test_seed);

        let details = self.score_problems(framing, &problems).await?;
        let record = TestEvaluationRecord::new(framing.clone(), details);
        self.storage.append_test_evaluation(&record).await?;

        let score = record.score();
        info!("Held-out {}", score);
        Ok(score)
    }

    async fn score_problems(&self, framing: &PromptFraming, problems: &[Problem]) -> Result<Vec<ProblemDetail>> {
        let questions: Vec<String> = problems.iter().map(|p| p.question.clone()).collect();
        let responses = self.model.query_batch(framing, &questions).await?;

        if responses.len() != problems.len() {
            warn!(
                "Model returned {} completions for {} problems",
                responses.len(),
                problems.len()
            );
        }

        let mut responses = responses.into_iter();
        let details = problems
            .iter()
            .map(|problem| {
                let response = responses.next().unwrap_or_default();
                let (extracted, correct) = self.scorer.score(&response, problem.answer);
                ProblemDetail::new(problem, response, extracted, correct)
            })
            .collect();
        Ok(details)
    }
}
