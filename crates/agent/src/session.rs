//! Session runner: one bounded conversation with the optimizing agent.
//!
//! ```text
//! AwaitingTurn ──reply with tool requests──▶ ToolCallsPending
//!      ▲                                          │
//!      └──────────── results sent (under cap) ────┘
//! AwaitingTurn ──final text / fatal error──▶ Finished
//! ToolCallsPending ──cap reached──▶ Finished
//! ```
//!
//! Every non-fatal finish is followed by one summary turn whose text is handed
//! to the next session.

use std::sync::Arc;
use std::time::Duration;

use mathprompt_core::{Config, SessionId, TokenUsage};
use mathprompt_eval::EvalError;
use mathprompt_tools::{ToolError, Toolbox};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::client::{AgentClient, AgentError, ErrorClass};
use crate::message::{AgentRequest, AgentResponse, ContentBlock, Message};
use crate::prompts::SUMMARY_REQUEST;

/// Limits for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hard cap on tool calls
    pub max_tool_calls: u32,
    /// Output cap per agent turn
    pub max_tokens_per_turn: u32,
    /// Wait before retrying a rate-limited turn
    pub rate_limit_backoff: Duration,
    /// Wall-clock limit for the whole session
    pub timeout: Duration,
}

impl SessionConfig {
    /// Limits from the application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tool_calls: config.runner.max_tool_calls,
            max_tokens_per_turn: config.agent.max_tokens_per_turn,
            rate_limit_backoff: Duration::from_secs(config.agent.rate_limit_backoff_secs),
            timeout: Duration::from_secs(config.runner.session_timeout_secs),
        }
    }
}

/// How a session ended, when it ended on its own terms.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    /// Finished cleanly
    pub success: bool,
    /// Handover text for the next session
    pub summary: Option<String>,
    /// Tool calls executed
    pub tool_calls_made: u32,
    /// Tokens across every turn, summary included
    pub usage: TokenUsage,
    /// Set when the agent rejected us for good (auth, billing)
    pub fatal_error: Option<String>,
}

impl SessionOutcome {
    /// Whether the loop must stop.
    pub fn is_fatal(&self) -> bool {
        self.fatal_error.is_some()
    }
}

/// What broke a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionFailure {
    /// Agent transport error that is neither a rate limit nor fatal.
    #[error(transparent)]
    Agent(AgentError),

    /// `evaluate_prompt` could not run.
    #[error(transparent)]
    Eval(EvalError),

    /// The session overran its wall-clock limit.
    #[error("session timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// A failed session, with whatever was spent before it failed.
#[derive(Debug, thiserror::Error)]
#[error("session failed after {tool_calls_made} tool calls: {cause}")]
pub struct SessionError {
    /// Underlying failure
    #[source]
    pub cause: SessionFailure,
    /// Tool calls executed before the failure
    pub tool_calls_made: u32,
    /// Tokens spent before the failure
    pub usage: TokenUsage,
}

impl SessionError {
    /// Log write failures end the whole run, not just the session.
    pub fn is_fatal(&self) -> bool {
        matches!(&self.cause, SessionFailure::Eval(e) if e.is_fatal())
    }
}

type ToolCall = (String, String, Value);

enum State {
    AwaitingTurn,
    ToolCallsPending(Vec<ToolCall>),
    Finished(Finish),
}

enum Finish {
    Success,
    SoftFailure,
    Fatal(String),
}

enum Turn {
    Reply(AgentResponse),
    Fatal(String),
}

/// Drives one session.
///
/// Counters live on the runner so they survive a timeout that drops the
/// in-flight turn.
pub struct SessionRunner {
    client: Arc<dyn AgentClient>,
    toolbox: Toolbox,
    config: SessionConfig,
    session: SessionId,
    request: AgentRequest,
    tool_calls_made: u32,
    usage: TokenUsage,
}

impl SessionRunner {
    /// Set up a session opened by `task` under the `system` framing.
    pub fn new(
        client: Arc<dyn AgentClient>,
        toolbox: Toolbox,
        config: SessionConfig,
        session: SessionId,
        system: String,
        task: String,
    ) -> Self {
        let request = AgentRequest {
            system,
            messages: vec![Message::user_text(task)],
            tools: toolbox.schemas(),
            max_tokens: config.max_tokens_per_turn,
        };
        Self {
            client,
            toolbox,
            config,
            session,
            request,
            tool_calls_made: 0,
            usage: TokenUsage::default(),
        }
    }

    /// Tool calls executed so far.
    pub fn tool_calls_made(&self) -> u32 {
        self.tool_calls_made
    }

    /// Tokens spent so far.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Conversation so far.
    pub fn messages(&self) -> &[Message] {
        &self.request.messages
    }

    /// Run the session to completion under its timeout.
    pub async fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        let limit = self.config.timeout;
        match tokio::time::timeout(limit, self.drive()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session = %self.session, "Session timed out after {}s", limit.as_secs());
                Err(self.fail(SessionFailure::Timeout(limit)))
            }
        }
    }

    async fn drive(&mut self) -> Result<SessionOutcome, SessionError> {
        info!(session = %self.session, "Session started");

        let mut state = State::AwaitingTurn;
        let finish = loop {
            state = match state {
                State::AwaitingTurn => match self.turn().await? {
                    Turn::Reply(response) => self.absorb(response),
                    Turn::Fatal(message) => State::Finished(Finish::Fatal(message)),
                },
                State::ToolCallsPending(calls) => {
                    self.run_tools(calls).await?;
                    if self.tool_calls_made >= self.config.max_tool_calls {
                        info!("Reached max tool calls ({})", self.config.max_tool_calls);
                        State::Finished(Finish::Success)
                    } else {
                        State::AwaitingTurn
                    }
                }
                State::Finished(finish) => break finish,
            };
        };

        info!("Tokens: {}", self.usage);

        let success = match finish {
            Finish::Fatal(message) => {
                return Ok(SessionOutcome {
                    success: false,
                    summary: None,
                    tool_calls_made: self.tool_calls_made,
                    usage: self.usage,
                    fatal_error: Some(message),
                })
            }
            Finish::Success => true,
            Finish::SoftFailure => false,
        };

        let summary = self.summarise().await;
        Ok(SessionOutcome {
            success,
            summary,
            tool_calls_made: self.tool_calls_made,
            usage: self.usage,
            fatal_error: None,
        })
    }

    /// One agent turn, retrying through rate limits.
    async fn turn(&mut self) -> Result<Turn, SessionError> {
        loop {
            let err = match self.client.send(&self.request).await {
                Ok(response) => return Ok(Turn::Reply(response)),
                Err(err) => err,
            };
            match err.class() {
                ErrorClass::RateLimited => {
                    warn!(
                        "Rate limited (will retry in {}s): {}",
                        self.config.rate_limit_backoff.as_secs(),
                        err
                    );
                    tokio::time::sleep(self.config.rate_limit_backoff).await;
                }
                ErrorClass::Fatal(_) => {
                    let message = err.fatal_message().unwrap_or_else(|| err.to_string());
                    error!("[FATAL] {}", message);
                    return Ok(Turn::Fatal(message));
                }
                ErrorClass::Recoverable => return Err(self.fail(SessionFailure::Agent(err))),
            }
        }
    }

    fn absorb(&mut self, response: AgentResponse) -> State {
        self.usage += response.usage;
        let calls = response.tool_uses();
        if !response.content.is_empty() {
            self.request.messages.push(Message::assistant(response.content));
        }

        if !calls.is_empty() {
            return State::ToolCallsPending(calls);
        }

        let clean = response.stop_reason.is_some_and(|r| r.is_clean()) || self.tool_calls_made > 0;
        if clean {
            State::Finished(Finish::Success)
        } else {
            warn!(
                "Agent stopped ({:?}) before making any tool call",
                response.stop_reason
            );
            State::Finished(Finish::SoftFailure)
        }
    }

    async fn run_tools(&mut self, calls: Vec<ToolCall>) -> Result<(), SessionError> {
        let mut results = Vec::with_capacity(calls.len());
        for (id, name, input) in calls {
            if self.tool_calls_made >= self.config.max_tool_calls {
                results.push(ContentBlock::tool_error(id, "Tool call limit reached for this session."));
                continue;
            }
            self.tool_calls_made += 1;
            info!("  {} call #{}", name, self.tool_calls_made);

            match self.toolbox.execute(&name, &input, self.session).await {
                Ok(text) => {
                    info!("  -> {}", text);
                    results.push(ContentBlock::tool_result(id, text));
                }
                Err(ToolError::Eval(e)) => return Err(self.fail(SessionFailure::Eval(e))),
                Err(e) => {
                    warn!("  -> {}", e);
                    results.push(ContentBlock::tool_error(id, e.to_string()));
                }
            }
        }
        self.request.messages.push(Message::user(results));
        Ok(())
    }

    /// Ask for the handover summary. Any failure just means no summary.
    async fn summarise(&mut self) -> Option<String> {
        self.request.push_user_text(SUMMARY_REQUEST);
        match self.client.send(&self.request).await {
            Ok(response) => {
                self.usage += response.usage;
                let summary = response.text();
                if summary.is_none() {
                    warn!("Summary turn returned no text");
                }
                summary
            }
            Err(e) => {
                warn!("Failed to get summary: {}", e);
                None
            }
        }
    }

    fn fail(&self, cause: SessionFailure) -> SessionError {
        SessionError {
            cause,
            tool_calls_made: self.tool_calls_made,
            usage: self.usage,
        }
    }
}
