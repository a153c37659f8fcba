//! Ollama-backed model adapter.
//!
//! Single framing goes through `/api/chat` (system message plus the question
//! as the user turn). Prefix/suffix framing goes through `/api/generate` in
//! raw mode so no chat template wraps the text.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use mathprompt_core::{ModelConfig, PromptFraming};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::adapter::{ModelAdapter, ModelError, Result};

/// Ollama model client.
#[derive(Clone)]
pub struct OllamaModel {
    client: Client,
    /// Ollama server URL
    host: String,
    /// Model tag, e.g. `qwen2.5:0.5b`
    name: String,
    max_tokens: u32,
    concurrency: usize,
}

impl OllamaModel {
    /// Create a client without touching the server.
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            client: ClientBuilder::new()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_default(),
            host: config.host.trim_end_matches('/').to_string(),
            name: config.name.clone(),
            max_tokens: config.max_tokens,
            concurrency: config.batch_concurrency.max(1),
        }
    }

    /// Create a client and make sure the model is installed.
    pub async fn connect(config: &ModelConfig) -> Result<Self> {
        let model = Self::new(config);
        model.ensure_model().await?;
        info!("Model {} ready at {}", model.name, model.host);
        Ok(model)
    }

    /// Model tag in use.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the Ollama server is available.
    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.url("/api/version"))
            .send()
            .await
            .map_err(|source| self.unreachable(source))?;

        Ok(response.status().is_success())
    }

    /// Fail with [`ModelError::ModelNotFound`] unless the model is installed.
    pub async fn ensure_model(&self) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/show"))
            .json(&json!({ "model": self.name }))
            .send()
            .await
            .map_err(|source| self.unreachable(source))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ModelError::ModelNotFound(self.name.clone())),
            status => Err(ModelError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Ask the server to evict the model from memory.
    pub async fn unload(&self) -> Result<()> {
        debug!("Unloading model {}", self.name);
        self.post("/api/generate", &json!({ "model": self.name, "keep_alive": 0 }))
            .await
            .map(|_| ())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    fn unreachable(&self, source: reqwest::Error) -> ModelError {
        ModelError::Unreachable {
            url: self.host.clone(),
            source,
        }
    }

    fn options(&self) -> Value {
        json!({
            "num_predict": self.max_tokens,
            "temperature": 0
        })
    }

    fn chat_body(&self, system: &str, question: &str) -> Value {
        json!({
            "model": self.name,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": format!("{} =", question) }
            ],
            "stream": false,
            "options": self.options()
        })
    }

    fn generate_body(&self, prefix: &str, suffix: &str, question: &str) -> Value {
        json!({
            "model": self.name,
            "prompt": format!("{}{}{}", prefix, question, suffix),
            "raw": true,
            "stream": false,
            "options": self.options()
        })
    }

    /// POST and return the response body text.
    async fn post(&self, path: &str, payload: &Value) -> Result<String> {
        let response = self.client.post(self.url(path)).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.text().await?)
    }
}

/// Pull the completion out of a chat or generate response body. A body that
/// does not parse yields an empty completion, which scores as incorrect.
fn completion_text(body: &str) -> String {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            warn!("Malformed model response ({}), treating as empty", e);
            return String::new();
        }
    };

    let text = value
        .pointer("/message/content")
        .or_else(|| value.get("response"))
        .and_then(Value::as_str);

    match text {
        Some(text) => text.to_string(),
        None => {
            warn!("Model response has no completion text, treating as empty");
            String::new()
        }
    }
}

#[async_trait]
impl ModelAdapter for OllamaModel {
    async fn query(&self, framing: &PromptFraming, question: &str) -> Result<String> {
        let body = match framing {
            PromptFraming::Single { prompt } => {
                self.post("/api/chat", &self.chat_body(prompt, question)).await?
            }
            PromptFraming::PrefixSuffix {
                problem_prefix,
                answer_prefix,
            } => {
                self.post(
                    "/api/generate",
                    &self.generate_body(problem_prefix, answer_prefix, question),
                )
                .await?
            }
        };
        Ok(completion_text(&body))
    }

    async fn query_batch(&self, framing: &PromptFraming, questions: &[String]) -> Result<Vec<String>> {
        debug!("Querying {} questions ({} in flight)", questions.len(), self.concurrency);
        let pending: Vec<_> = questions
            .iter()
            .map(|question| self.query(framing, question))
            .collect();
        stream::iter(pending)
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}
