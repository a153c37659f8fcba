//! How a candidate prompt wraps each question.

use serde::{Deserialize, Serialize};

/// A candidate prompt, in one of the two supported framings.
///
/// In the logs the framing is flattened into the record: a single framing
/// writes a `prompt` field, a prefix/suffix framing writes `problem_prefix`
/// and `answer_prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptFraming {
    /// One system-style instruction; the question is sent as the user turn.
    Single {
        /// System prompt text.
        prompt: String,
    },
    /// Raw completion: `problem_prefix + question + answer_prefix`.
    PrefixSuffix {
        /// Text placed before the question.
        problem_prefix: String,
        /// Text placed after the question, right where the answer starts.
        answer_prefix: String,
    },
}

impl PromptFraming {
    /// Single system-style framing.
    pub fn single(prompt: impl Into<String>) -> Self {
        PromptFraming::Single {
            prompt: prompt.into(),
        }
    }

    /// Prefix/suffix framing.
    pub fn prefix_suffix(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        PromptFraming::PrefixSuffix {
            problem_prefix: prefix.into(),
            answer_prefix: suffix.into(),
        }
    }

    /// Which framing style this prompt uses.
    pub fn style(&self) -> FramingStyle {
        match self {
            PromptFraming::Single { .. } => FramingStyle::Single,
            PromptFraming::PrefixSuffix { .. } => FramingStyle::PrefixSuffix,
        }
    }

    /// Total prompt length in characters (both parts for prefix/suffix).
    pub fn len(&self) -> usize {
        match self {
            PromptFraming::Single { prompt } => prompt.chars().count(),
            PromptFraming::PrefixSuffix {
                problem_prefix,
                answer_prefix,
            } => problem_prefix.chars().count() + answer_prefix.chars().count(),
        }
    }

    /// Whether the prompt has no text at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for PromptFraming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptFraming::Single { prompt } => f.write_str(prompt),
            PromptFraming::PrefixSuffix {
                problem_prefix,
                answer_prefix,
            } => write!(f, "{}{{question}}{}", problem_prefix, answer_prefix),
        }
    }
}

/// Framing style selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingStyle {
    /// One system prompt
    #[default]
    Single,
    /// Prefix and suffix around the question
    PrefixSuffix,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_framing_roundtrips_as_prompt_field() {
        let framing = PromptFraming::single("You are a calculator.");
        let json = serde_json::to_value(&framing).unwrap();
        assert_eq!(json["prompt"], "You are a calculator.");

        let back: PromptFraming = serde_json::from_value(json).unwrap();
        assert_eq!(back.style(), FramingStyle::Single);
    }

    #[test]
    fn test_prefix_suffix_framing_fields() {
        let json = serde_json::json!({"problem_prefix": "Q: ", "answer_prefix": "\nA:"});
        let framing: PromptFraming = serde_json::from_value(json).unwrap();
        assert_eq!(framing, PromptFraming::prefix_suffix("Q: ", "\nA:"));
        assert_eq!(framing.to_string(), "Q: {question}\nA:");
        assert_eq!(framing.len(), 6);
    }
}
