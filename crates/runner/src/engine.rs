//! The optimization loop - runs one agent session after another.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mathprompt_agent::prompts::{self, DEFAULT_SYSTEM_TEMPLATE};
use mathprompt_agent::{AgentClient, SessionConfig, SessionError, SessionRunner};
use mathprompt_core::{Config, Pricing, SessionId, SessionRecord, TokenUsage};
use mathprompt_eval::{EvalError, Evaluator};
use mathprompt_storage::{Storage, StorageError};
use mathprompt_tools::{EvaluatePromptTool, Toolbox};
use tracing::{error, info, warn};

/// Summaries longer than this are cut when logged.
const SUMMARY_LOG_CHARS: usize = 2000;

/// Configuration for the optimization loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Sessions to run before stopping
    pub max_sessions: u32,
    /// Consecutive failed sessions before giving up
    pub max_retries: u32,
    /// Pause after a failed session
    pub retry_delay: Duration,
    /// Per-session limits
    pub session: SessionConfig,
    /// Agent pricing for the cost estimate
    pub pricing: Pricing,
}

impl LoopConfig {
    /// Loop settings from the application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_sessions: config.runner.max_sessions,
            max_retries: config.runner.max_retries,
            retry_delay: Duration::from_secs(config.runner.retry_delay_secs),
            session: SessionConfig::from_config(config),
            pricing: config.agent.pricing,
        }
    }
}

/// Errors that end the loop abnormally.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// A log could not be read or written.
    #[error("log failure: {0}")]
    Storage(#[from] StorageError),

    /// A held-out evaluation could not be logged.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// A session hit an unrecoverable failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// Ran every configured session.
    Completed,
    /// The agent rejected us for good.
    Fatal(String),
    /// Too many failed sessions in a row.
    RetriesExhausted,
    /// Stopped by a shutdown signal.
    Interrupted,
}

/// Result of a loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    /// Why the loop stopped
    pub exit: LoopExit,
    /// Sessions attempted
    pub sessions_run: u32,
    /// Most recent held-out accuracy
    pub last_test_accuracy: Option<f64>,
}

/// The outer loop.
///
/// ```text
/// Scan best → Session → Held-out eval → Session record → (sleep on failure)
/// ```
///
/// Nothing is carried in memory between sessions except the handover
/// summary; the best-known prompt is re-read from the log every time.
pub struct OptimizationLoop {
    evaluator: Arc<Evaluator>,
    agent: Arc<dyn AgentClient>,
    toolbox: Toolbox,
    system_template: String,
    config: LoopConfig,
    sessions_run: u32,
    last_test_accuracy: Option<f64>,
}

impl OptimizationLoop {
    /// Create a loop offering `evaluate_prompt` backed by `evaluator`.
    pub fn new(evaluator: Arc<Evaluator>, agent: Arc<dyn AgentClient>, config: &Config) -> Self {
        let tool = EvaluatePromptTool::new(evaluator.clone(), config.framing, config.problems.train_count);
        let template = config
            .prompts
            .system_template
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_TEMPLATE);

        Self {
            evaluator,
            agent,
            toolbox: Toolbox::new().with(Arc::new(tool)),
            system_template: prompts::render_system(template, &config.model.name, config.problems.train_count),
            config: LoopConfig::from_config(config),
            sessions_run: 0,
            last_test_accuracy: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    fn storage(&self) -> &Arc<dyn Storage> {
        self.evaluator.storage()
    }

    /// Session to start from: one past the highest id in the logs.
    pub async fn next_session(&self) -> Result<SessionId, LoopError> {
        Ok(self
            .storage()
            .last_session()
            .await?
            .map(SessionId::next)
            .unwrap_or(SessionId::FIRST))
    }

    /// Run until the sessions, the retry budget or the agent's patience run out.
    pub async fn run(&mut self) -> Result<LoopReport, LoopError> {
        let mut session = self.next_session().await?;
        let mut consecutive_failures = 0u32;
        let mut previous_summary: Option<String> = None;

        for _ in 0..self.config.max_sessions {
            let best = self.storage().best_evaluation().await?;
            info!(
                "--- Session {} | Best so far: {:.1}% ---",
                session,
                best.as_ref().map_or(0.0, |b| b.accuracy * 100.0)
            );

            let system = prompts::system_prompt(&self.system_template, best.as_ref());
            let task = prompts::build_task(best.as_ref(), previous_summary.as_deref());
            let mut runner = SessionRunner::new(
                self.agent.clone(),
                self.toolbox.clone(),
                self.config.session.clone(),
                session,
                system,
                task,
            );
            self.sessions_run += 1;

            let failed = match runner.run().await {
                Ok(outcome) if outcome.is_fatal() => {
                    let message = outcome.fatal_error.clone().unwrap_or_default();
                    error!("Stopping optimization loop due to fatal error");
                    self.record_session(session, false, outcome.tool_calls_made, outcome.usage, None)
                        .await?;
                    return Ok(self.report(LoopExit::Fatal(message)));
                }
                Ok(outcome) => {
                    let test_accuracy = self.held_out_best().await?;
                    self.record_session(
                        session,
                        outcome.success,
                        outcome.tool_calls_made,
                        outcome.usage,
                        test_accuracy,
                    )
                    .await?;

                    if outcome.success {
                        info!("Session completed ({} tool calls)", outcome.tool_calls_made);
                        if let Some(summary) = &outcome.summary {
                            info!("{}", summary.chars().take(SUMMARY_LOG_CHARS).collect::<String>());
                        }
                        previous_summary = outcome.summary;
                        false
                    } else {
                        warn!("Session did not complete successfully");
                        true
                    }
                }
                Err(err) if err.is_fatal() => {
                    error!("Session failed: {}", err);
                    return Err(err.into());
                }
                Err(err) => {
                    error!("Session failed: {}", err);
                    let test_accuracy = self.held_out_best().await?;
                    self.record_session(session, false, err.tool_calls_made, err.usage, test_accuracy)
                        .await?;
                    true
                }
            };

            if failed {
                consecutive_failures += 1;
                if consecutive_failures >= self.config.max_retries {
                    error!("{} consecutive failures, stopping", self.config.max_retries);
                    return Ok(self.report(LoopExit::RetriesExhausted));
                }
                info!(
                    "Retrying in {}s ({}/{} failures)...",
                    self.config.retry_delay.as_secs(),
                    consecutive_failures,
                    self.config.max_retries
                );
                tokio::time::sleep(self.config.retry_delay).await;
            } else {
                consecutive_failures = 0;
            }

            session = session.next();
        }

        info!("Done!");
        Ok(self.report(LoopExit::Completed))
    }

    /// Like [`run`](Self::run), but stops when `shutdown` resolves. The
    /// in-flight session is dropped, then the best-known prompt gets one last
    /// held-out evaluation.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<LoopReport, LoopError>
    where
        F: Future<Output = ()>,
    {
        let finished = tokio::select! {
            result = self.run() => Some(result),
            _ = shutdown => None,
        };
        if let Some(result) = finished {
            return result;
        }

        warn!("Interrupted");
        match self.storage().best_evaluation().await? {
            Some(best) => info!("Best training accuracy so far: {:.1}%", best.accuracy * 100.0),
            None => info!("No evaluations logged yet"),
        }
        self.held_out_best().await?;
        info!("Will resume from best prompt on next run");
        Ok(self.report(LoopExit::Interrupted))
    }

    /// Held-out evaluation of the best-known prompt, if there is one. Model
    /// failures only cost the measurement.
    async fn held_out_best(&mut self) -> Result<Option<f64>, LoopError> {
        let Some(best) = self.storage().best_evaluation().await? else {
            return Ok(None);
        };

        info!("Running test set evaluation...");
        match self.evaluator.evaluate_held_out(&best.framing).await {
            Ok(score) => {
                info!(
                    "Training best: {:.1}% | Test accuracy: {:.1}%",
                    best.accuracy * 100.0,
                    score.accuracy * 100.0
                );
                self.last_test_accuracy = Some(score.accuracy);
                Ok(Some(score.accuracy))
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!("Test evaluation failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn record_session(
        &self,
        session: SessionId,
        success: bool,
        tool_calls_made: u32,
        usage: TokenUsage,
        test_accuracy: Option<f64>,
    ) -> Result<(), LoopError> {
        let record = SessionRecord {
            timestamp: chrono::Utc::now(),
            session,
            success,
            tool_calls_made,
            usage,
            estimated_cost_usd: usage.estimated_cost_usd(&self.config.pricing),
            test_accuracy,
        };
        self.storage().append_session(&record).await?;
        info!(
            session = %session,
            "Session logged: {} tool calls, ${:.4}",
            tool_calls_made,
            record.estimated_cost_usd
        );
        Ok(())
    }

    fn report(&self, exit: LoopExit) -> LoopReport {
        LoopReport {
            exit,
            sessions_run: self.sessions_run,
            last_test_accuracy: self.last_test_accuracy,
        }
    }

    /// Sessions attempted so far.
    pub fn sessions_run(&self) -> u32 {
        self.sessions_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mathprompt_agent::{AgentError, AgentRequest, AgentResponse, ContentBlock, StopReason};
    use mathprompt_core::{EvaluationRecord, PromptFraming};
    use mathprompt_model::ModelAdapter;
    use mathprompt_storage::JsonlStorage;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Always answers 0, so every problem but the rare zero is wrong.
    struct Zero;

    #[async_trait]
    impl ModelAdapter for Zero {
        async fn query(&self, _framing: &PromptFraming, _question: &str) -> mathprompt_model::Result<String> {
            Ok("0".to_string())
        }
    }

    enum Reply {
        Ok(AgentResponse),
        Err(AgentError),
        Hang,
    }

    struct ScriptedAgent {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<AgentRequest>>,
    }

    impl ScriptedAgent {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn first_messages(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.messages.len() == 1)
                .filter_map(|r| match &r.messages[0].content[0] {
                    ContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl AgentClient for ScriptedAgent {
        async fn send(&self, request: &AgentRequest) -> mathprompt_agent::client::Result<AgentResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Ok(response)) => Ok(response),
                Some(Reply::Err(err)) => Err(err),
                Some(Reply::Hang) => std::future::pending().await,
                None => Err(AgentError::Decode("script exhausted".into())),
            }
        }
    }

    fn evaluate(id: &str, prompt: &str) -> Reply {
        Reply::Ok(AgentResponse {
            content: vec![ContentBlock::ToolUse {
                id: id.into(),
                name: "evaluate_prompt".into(),
                input: json!({ "prompt": prompt }),
            }],
            stop_reason: Some(StopReason::ToolUse),
            usage: TokenUsage {
                input_tokens: 1_000,
                output_tokens: 100,
                ..TokenUsage::default()
            },
        })
    }

    fn text(text: &str, stop: StopReason) -> Reply {
        Reply::Ok(AgentResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason: Some(stop),
            usage: TokenUsage::default(),
        })
    }

    fn api_error(status: u16, error_type: &str, message: &str) -> Reply {
        Reply::Err(AgentError::Api {
            status,
            error_type: Some(error_type.into()),
            message: message.into(),
        })
    }

    fn config(max_sessions: u32, max_retries: u32) -> Config {
        let mut config = Config::default();
        config.problems.train_count = 4;
        config.problems.test_count = 7;
        config.runner.max_sessions = max_sessions;
        config.runner.max_retries = max_retries;
        config
    }

    async fn build(dir: &TempDir, agent: Arc<ScriptedAgent>, config: &Config) -> OptimizationLoop {
        let storage: Arc<dyn Storage> = Arc::new(JsonlStorage::in_dir(dir.path()));
        let evaluator = Evaluator::new(storage, Arc::new(Zero), config).await.unwrap();
        OptimizationLoop::new(Arc::new(evaluator), agent, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_all_sessions_and_carries_summary() {
        let dir = TempDir::new().unwrap();
        let agent = ScriptedAgent::new(vec![
            evaluate("t1", "Answer with a number."),
            text("Done.", StopReason::EndTurn),
            text("Plain instructions score 0%.", StopReason::EndTurn),
            evaluate("t2", "Show your working."),
            text("Done.", StopReason::EndTurn),
            text("Working did not help.", StopReason::EndTurn),
        ]);
        let mut optimizer = build(&dir, agent.clone(), &config(2, 3)).await;

        let report = optimizer.run().await.unwrap();
        assert_eq!(report.exit, LoopExit::Completed);
        assert_eq!(report.sessions_run, 2);
        assert!(report.last_test_accuracy.is_some());

        let storage = JsonlStorage::in_dir(dir.path());
        let sessions = storage.list_sessions().await.unwrap();
        let ids: Vec<u64> = sessions.iter().map(|s| s.session.get()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(sessions.iter().all(|s| s.success && s.tool_calls_made == 1));
        assert!(sessions.iter().all(|s| s.test_accuracy.is_some()));
        assert_eq!(sessions[0].usage.input_tokens, 1_000);
        assert_eq!(sessions[0].estimated_cost_usd, 0.0045);
        assert_eq!(storage.list_test_evaluations().await.unwrap().len(), 2);

        let tasks = agent.first_messages();
        assert_eq!(tasks.len(), 2);
        assert!(!tasks[0].contains("Summary from the previous session"));
        assert!(tasks[1].contains("Plain instructions score 0%."));
        assert!(tasks[1].contains("Previous best result"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_without_sleeping() {
        let dir = TempDir::new().unwrap();
        let agent = ScriptedAgent::new(vec![api_error(401, "authentication_error", "invalid x-api-key")]);
        let mut optimizer = build(&dir, agent, &config(10, 5)).await;

        let started = tokio::time::Instant::now();
        let report = optimizer.run().await.unwrap();
        assert!(matches!(report.exit, LoopExit::Fatal(ref msg) if msg.contains("authentication")));
        assert_eq!(report.sessions_run, 1);
        assert!(started.elapsed() < Duration::from_secs(1));

        let storage = JsonlStorage::in_dir(dir.path());
        let sessions = storage.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(!sessions[0].success);
        assert_eq!(sessions[0].test_accuracy, None);
        assert!(storage.list_test_evaluations().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_back_off_until_cap() {
        let dir = TempDir::new().unwrap();
        let agent = ScriptedAgent::new(vec![
            api_error(500, "api_error", "Internal server error"),
            api_error(500, "api_error", "Internal server error"),
            api_error(500, "api_error", "Internal server error"),
        ]);
        let mut optimizer = build(&dir, agent, &config(10, 3)).await;

        let started = tokio::time::Instant::now();
        let report = optimizer.run().await.unwrap();
        assert_eq!(report.exit, LoopExit::RetriesExhausted);
        assert_eq!(report.sessions_run, 3);
        // Two pauses between three failures; none after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(600) && elapsed < Duration::from_secs(900));

        let sessions = JsonlStorage::in_dir(dir.path()).list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 3);
        assert!(sessions.iter().all(|s| !s.success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_failure_counts_against_cap() {
        let dir = TempDir::new().unwrap();
        let agent = ScriptedAgent::new(vec![
            text("I need more tokens to", StopReason::MaxTokens),
            text("Nothing tried.", StopReason::EndTurn),
        ]);
        let mut optimizer = build(&dir, agent, &config(10, 1)).await;

        let report = optimizer.run().await.unwrap();
        assert_eq!(report.exit, LoopExit::RetriesExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let dir = TempDir::new().unwrap();
        let agent = ScriptedAgent::new(vec![
            api_error(500, "api_error", "boom"),
            text("Done.", StopReason::EndTurn),
            text("Summary.", StopReason::EndTurn),
            api_error(500, "api_error", "boom"),
            text("Done.", StopReason::EndTurn),
            text("Summary.", StopReason::EndTurn),
        ]);
        let mut optimizer = build(&dir, agent, &config(4, 2)).await;

        let report = optimizer.run().await.unwrap();
        assert_eq!(report.exit, LoopExit::Completed);
        assert_eq!(report.sessions_run, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sessions_still_measure_held_out() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path());
        let record = EvaluationRecord::new(1, SessionId::FIRST, PromptFraming::single("best"), vec![]);
        storage.append_evaluation(&record).await.unwrap();

        let agent = ScriptedAgent::new(vec![
            api_error(500, "api_error", "boom"),
            text("I need more tokens to", StopReason::MaxTokens),
            text("Nothing tried.", StopReason::EndTurn),
        ]);
        let mut optimizer = build(&dir, agent, &config(2, 5)).await;

        let report = optimizer.run().await.unwrap();
        assert_eq!(report.exit, LoopExit::Completed);
        assert!(report.last_test_accuracy.is_some());

        let tests = storage.list_test_evaluations().await.unwrap();
        assert_eq!(tests.len(), 2);
        assert!(tests.iter().all(|t| t.framing == PromptFraming::single("best")));

        let sessions = storage.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| !s.success && s.test_accuracy.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_session_numbering() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path());
        let record = EvaluationRecord::new(9, SessionId::new(4), PromptFraming::single("old"), vec![]);
        storage.append_evaluation(&record).await.unwrap();
        storage
            .append_session(&SessionRecord {
                timestamp: chrono::Utc::now(),
                session: SessionId::new(6),
                success: true,
                tool_calls_made: 0,
                usage: TokenUsage::default(),
                estimated_cost_usd: 0.0,
                test_accuracy: None,
            })
            .await
            .unwrap();

        let agent = ScriptedAgent::new(vec![
            evaluate("t1", "new"),
            text("Done.", StopReason::EndTurn),
            text("Summary.", StopReason::EndTurn),
        ]);
        let mut optimizer = build(&dir, agent, &config(1, 1)).await;
        assert_eq!(optimizer.next_session().await.unwrap(), SessionId::new(7));
        optimizer.run().await.unwrap();

        let evals = storage.list_evaluations().await.unwrap();
        assert_eq!(evals.last().unwrap().session, SessionId::new(7));
        assert_eq!(evals.last().unwrap().iteration, 10);
        assert_eq!(storage.list_sessions().await.unwrap().last().unwrap().session, SessionId::new(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_runs_final_held_out_eval() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path());
        let record = EvaluationRecord::new(1, SessionId::FIRST, PromptFraming::single("best"), vec![]);
        storage.append_evaluation(&record).await.unwrap();

        let agent = ScriptedAgent::new(vec![Reply::Hang]);
        let mut optimizer = build(&dir, agent, &config(5, 5)).await;

        let report = optimizer
            .run_until(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(report.exit, LoopExit::Interrupted);
        assert!(report.last_test_accuracy.is_some());

        let tests = storage.list_test_evaluations().await.unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].framing, PromptFraming::single("best"));
        // The dropped session leaves no session record.
        assert!(storage.list_sessions().await.unwrap().is_empty());
    }
}
