//! Model adapter trait.

use async_trait::async_trait;
use mathprompt_core::PromptFraming;

/// Result type for model queries.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors from the inference backend.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Transport failure talking to the backend.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend could not be reached at all.
    #[error("inference server unreachable at {url}: {source}")]
    Unreachable {
        /// Server base URL
        url: String,
        /// Underlying error
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("inference API error (status {status}): {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// The configured model is not installed on the backend.
    #[error("model '{0}' is not available; pull it first (ollama pull {0})")]
    ModelNotFound(String),
}

/// Sends questions, wrapped in a candidate prompt, to the model under test.
///
/// Implementations own the model handle. No retries happen here: backend
/// failures go straight back to the caller.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Complete a single question.
    async fn query(&self, framing: &PromptFraming, question: &str) -> Result<String>;

    /// Complete many questions. The output has one completion per question,
    /// in input order.
    async fn query_batch(&self, framing: &PromptFraming, questions: &[String]) -> Result<Vec<String>> {
        let mut completions = Vec::with_capacity(questions.len());
        for question in questions {
            completions.push(self.query(framing, question).await?);
        }
        Ok(completions)
    }
}
