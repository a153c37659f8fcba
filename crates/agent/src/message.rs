//! Conversation history exchanged with the agent.

use mathprompt_core::TokenUsage;
use mathprompt_tools::ToolSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Us: the task, tool results, the summary request.
    User,
    /// The optimizing agent.
    Assistant,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Free text.
    Text {
        /// The text
        text: String,
    },
    /// The agent asks for a tool to be run.
    ToolUse {
        /// Id to echo back in the result
        id: String,
        /// Tool name
        name: String,
        /// Tool arguments
        input: Value,
    },
    /// Our answer to a tool request.
    ToolResult {
        /// Id of the matching `ToolUse`
        tool_use_id: String,
        /// Result text
        content: String,
        /// Set when the call could not be carried out
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Any block type this client does not model (thinking, citations, ...).
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    /// Text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Successful tool result.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Failed tool result.
    pub fn tool_error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker
    pub role: Role,
    /// Content blocks
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// User message with a single text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// User message carrying tool results.
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// Assistant message.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }
}

/// Why the agent stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the turn.
    EndTurn,
    /// Waiting for tool results.
    ToolUse,
    /// Ran into the per-turn token cap.
    MaxTokens,
    /// Hit a stop sequence.
    StopSequence,
    /// Long turn paused by the server.
    PauseTurn,
    /// Declined to continue.
    Refusal,
    /// Anything newer than this client.
    #[serde(other)]
    Other,
}

impl StopReason {
    /// Whether the turn loop ended the way a healthy session ends.
    pub fn is_clean(self) -> bool {
        matches!(self, StopReason::EndTurn | StopReason::ToolUse)
    }
}

/// Everything sent to the agent for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    /// System framing
    pub system: String,
    /// Conversation so far
    pub messages: Vec<Message>,
    /// Tools on offer
    pub tools: Vec<ToolSchema>,
    /// Output cap for the turn
    pub max_tokens: u32,
}

impl AgentRequest {
    /// Append a user text block, merging into a trailing user message so roles
    /// keep alternating.
    pub fn push_user_text(&mut self, text: impl Into<String>) {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::User => last.content.push(ContentBlock::text(text)),
            _ => self.messages.push(Message::user_text(text)),
        }
    }
}

/// One agent turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    /// Content blocks, in order
    pub content: Vec<ContentBlock>,
    /// Stop reason, when the server reports one
    pub stop_reason: Option<StopReason>,
    /// Tokens billed for this turn
    pub usage: TokenUsage,
}

impl AgentResponse {
    /// Text blocks joined by newlines, or `None` without any text.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Tool requests, in order: `(id, name, input)`.
    pub fn tool_uses(&self) -> Vec<(String, String, Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some((id.clone(), name.clone(), input.clone())),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_block_wire_format() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "tool_use",
            "id": "toolu_1",
            "name": "evaluate_prompt",
            "input": {"prompt": "Be exact."}
        }))
        .unwrap();
        assert!(matches!(block, ContentBlock::ToolUse { ref name, .. } if name == "evaluate_prompt"));

        let result = serde_json::to_value(ContentBlock::tool_result("toolu_1", "Accuracy: 50.0% (1/2 correct)")).unwrap();
        assert_eq!(result["type"], "tool_result");
        assert!(result.get("is_error").is_none());

        let error = serde_json::to_value(ContentBlock::tool_error("toolu_1", "bad")).unwrap();
        assert_eq!(error["is_error"], true);
    }

    #[test]
    fn test_unknown_blocks_and_stop_reasons() {
        let block: ContentBlock = serde_json::from_value(json!({"type": "thinking", "thinking": "hmm"})).unwrap();
        assert_eq!(block, ContentBlock::Unknown);

        let reason: StopReason = serde_json::from_value(json!("model_context_window_exceeded")).unwrap();
        assert_eq!(reason, StopReason::Other);
        assert!(StopReason::EndTurn.is_clean());
        assert!(!StopReason::MaxTokens.is_clean());
    }

    #[test]
    fn test_push_user_text_merges() {
        let mut request = AgentRequest {
            system: String::new(),
            messages: vec![Message::user(vec![ContentBlock::tool_result("t", "ok")])],
            tools: vec![],
            max_tokens: 10,
        };
        request.push_user_text("Summarise.");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].content.len(), 2);

        request.messages.push(Message::assistant(vec![ContentBlock::text("done")]));
        request.push_user_text("Again.");
        assert_eq!(request.messages.len(), 3);
    }

    #[test]
    fn test_response_accessors() {
        let response = AgentResponse {
            content: vec![
                ContentBlock::text("Trying two prompts."),
                ContentBlock::ToolUse {
                    id: "a".into(),
                    name: "evaluate_prompt".into(),
                    input: json!({"prompt": "x"}),
                },
                ContentBlock::text("Done."),
            ],
            stop_reason: Some(StopReason::ToolUse),
            usage: TokenUsage::default(),
        };
        assert_eq!(response.text().as_deref(), Some("Trying two prompts.\nDone."));
        assert_eq!(response.tool_uses().len(), 1);
    }
}
