//! The `evaluate_prompt` tool.

use std::sync::Arc;

use async_trait::async_trait;
use mathprompt_core::{FramingStyle, PromptFraming, SessionId};
use mathprompt_eval::Evaluator;
use serde_json::Value;
use tracing::debug;

use crate::r#trait::{Parameter, Tool, ToolError, ToolSchema};

/// Tool name seen by the agent.
pub const EVALUATE_PROMPT: &str = "evaluate_prompt";

/// Scores a candidate prompt on fresh training problems.
///
/// The agent only ever gets the accuracy line back, never the per-problem
/// trace; the trace goes to the evaluation log.
pub struct EvaluatePromptTool {
    evaluator: Arc<Evaluator>,
    style: FramingStyle,
    description: String,
}

impl EvaluatePromptTool {
    /// Tool for prompts in `style`, scored on `train_count` problems per call.
    pub fn new(evaluator: Arc<Evaluator>, style: FramingStyle, train_count: usize) -> Self {
        let description = match style {
            FramingStyle::Single => format!(
                "Test a system prompt against {} randomly-generated math problems. \
                 Returns only the accuracy score. Problems are freshly randomised each call.",
                train_count
            ),
            FramingStyle::PrefixSuffix => format!(
                "Test a prompt against {} randomly-generated math problems. Each question is \
                 sent as problem_prefix + question + answer_prefix. Returns only the accuracy \
                 score. Problems are freshly randomised each call.",
                train_count
            ),
        };
        Self {
            evaluator,
            style,
            description,
        }
    }

    /// Turn the agent's arguments into a framing.
    pub fn parse_framing(&self, input: &Value) -> Result<PromptFraming, ToolError> {
        match self.style {
            FramingStyle::Single => Ok(PromptFraming::single(string_arg(input, "prompt")?)),
            FramingStyle::PrefixSuffix => Ok(PromptFraming::prefix_suffix(
                string_arg(input, "problem_prefix")?,
                string_arg(input, "answer_prefix")?,
            )),
        }
    }
}

fn string_arg<'a>(input: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    input
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing string argument '{}'", name)))
}

#[async_trait]
impl Tool for EvaluatePromptTool {
    fn name(&self) -> &str {
        EVALUATE_PROMPT
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> ToolSchema {
        let parameters = match self.style {
            FramingStyle::Single => vec![Parameter::required_string("prompt", "The system prompt to test.")],
            FramingStyle::PrefixSuffix => vec![
                Parameter::required_string("problem_prefix", "Text placed before each question."),
                Parameter::required_string(
                    "answer_prefix",
                    "Text placed after each question, right where the answer starts.",
                ),
            ],
        };
        ToolSchema {
            name: EVALUATE_PROMPT.to_string(),
            description: self.description.clone(),
            parameters,
        }
    }

    async fn execute(&self, input: &Value, session: SessionId) -> Result<String, ToolError> {
        let framing = self.parse_framing(input)?;
        debug!("evaluate_prompt ({} chars) for session {}", framing.len(), session);
        let score = self.evaluator.evaluate(&framing, session).await?;
        Ok(score.to_string())
    }
}
