//! Anthropic Messages API client.

use std::time::Duration;

use async_trait::async_trait;
use mathprompt_core::{AgentConfig, TokenUsage};
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::client::{AgentClient, AgentError, Result};
use crate::message::{AgentRequest, AgentResponse, ContentBlock, Role, StopReason};

const API_VERSION: &str = "2023-06-01";
const TURN_TIMEOUT: Duration = Duration::from_secs(600);

/// Messages API client with prompt caching.
pub struct AnthropicClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    /// Create a client for `config.model` using `api_key`.
    pub fn new(config: &AgentConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: ClientBuilder::new()
                .timeout(TURN_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
        }
    }

    /// Request body for one turn.
    ///
    /// The system block and the most recent tool result carry ephemeral cache
    /// markers; nothing older does.
    pub fn build_body(&self, request: &AgentRequest) -> Value {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema(),
                })
            })
            .collect();

        let mut messages = serde_json::to_value(&request.messages).unwrap_or_else(|_| json!([]));
        mark_last_tool_result(&request.messages, &mut messages);

        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": [{
                "type": "text",
                "text": request.system,
                "cache_control": { "type": "ephemeral" }
            }],
            "tools": tools,
            "messages": messages,
        })
    }
}

fn mark_last_tool_result(messages: &[crate::message::Message], wire: &mut Value) {
    let position = messages.iter().enumerate().rev().find_map(|(i, m)| {
        if m.role != Role::User {
            return None;
        }
        m.content
            .iter()
            .rposition(|b| matches!(b, ContentBlock::ToolResult { .. }))
            .map(|j| (i, j))
    });

    if let Some((i, j)) = position {
        if let Some(block) = wire.get_mut(i).and_then(|m| m.get_mut("content")).and_then(|c| c.get_mut(j)) {
            block["cache_control"] = json!({ "type": "ephemeral" });
        }
    }
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<StopReason>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireError {
    error: WireErrorBody,
}

#[derive(Deserialize)]
struct WireErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

fn decode_response(body: &str) -> Result<AgentResponse> {
    let wire: WireResponse = serde_json::from_str(body).map_err(|e| AgentError::Decode(e.to_string()))?;
    let usage = wire
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_creation_tokens: u.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: u.cache_read_input_tokens.unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(AgentResponse {
        content: wire
            .content
            .into_iter()
            .filter(|b| *b != ContentBlock::Unknown)
            .collect(),
        stop_reason: wire.stop_reason,
        usage,
    })
}

fn decode_error(status: u16, body: &str) -> AgentError {
    match serde_json::from_str::<WireError>(body) {
        Ok(wire) => AgentError::Api {
            status,
            error_type: Some(wire.error.kind),
            message: wire.error.message,
        },
        Err(_) => AgentError::Api {
            status,
            error_type: None,
            message: body.trim().to_string(),
        },
    }
}

#[async_trait]
impl AgentClient for AnthropicClient {
    async fn send(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let body = self.build_body(request);
        debug!("Agent turn with {} messages", request.messages.len());

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &text));
        }
        decode_response(&text)
    }
}
