//! mathprompt CLI - optimizes a system prompt for a small arithmetic model.

mod daemon;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mathprompt_agent::{AnthropicClient, McpServer};
use mathprompt_core::{Config, FramingStyle, PromptFraming, SessionId};
use mathprompt_eval::Evaluator;
use mathprompt_model::{ModelError, OllamaModel};
use mathprompt_problems::generate_test_problems_seeded;
use mathprompt_runner::{LoopExit, OptimizationLoop};
use mathprompt_storage::{best_of, JsonlStorage, Storage};
use mathprompt_tools::{EvaluatePromptTool, Toolbox};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mathprompt")]
#[command(about = "Prompt optimizer for a small arithmetic model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./mathprompt.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the optimization loop in the foreground
    Run,
    /// Run the optimization loop in the background
    Start,
    /// Stop the background runner
    Stop {
        /// Seconds to wait after SIGTERM before SIGKILL
        #[arg(long, default_value = "30")]
        grace: u64,
    },
    /// Show runner state and results so far
    Status,
    /// Show the background runner's output
    Logs {
        /// Lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
        /// Keep printing new output
        #[arg(short, long)]
        follow: bool,
    },
    /// Delete all logs and start fresh
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Evaluate a prompt on the held-out set (default: best prompt from the logs)
    TestEval {
        /// Prompt to test (framing = "single")
        #[arg(long)]
        prompt: Option<String>,
        /// Text before the question (framing = "prefix_suffix")
        #[arg(long)]
        problem_prefix: Option<String>,
        /// Text after the question (framing = "prefix_suffix")
        #[arg(long)]
        answer_prefix: Option<String>,
    },
    /// Export the held-out set as JSON
    TestSet {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Serve evaluate_prompt over MCP (stdio)
    Mcp {
        /// Session id to tag evaluations with (default: next session)
        #[arg(long)]
        session: Option<u64>,
    },
    /// Print the resolved configuration
    Config,
}

fn init_logging(verbose: bool, to_stderr: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if to_stderr {
        // stdout carries the MCP protocol
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, matches!(cli.command, Commands::Mcp { .. }));

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run(&config).await?,
        Commands::Start => {
            require_api_key(&config)?;
            connect_model(&config).await?;
            let pid = daemon::start(&config.paths, cli.config.as_deref(), cli.verbose)?;
            println!("Runner started (pid {})", pid);
            println!("Logs: {}", config.paths.runner_log().display());
        }
        Commands::Stop { grace } => {
            if daemon::stop(&config.paths, Duration::from_secs(grace)).await? {
                println!("Runner stopped");
            } else {
                println!("Runner is not running");
            }
        }
        Commands::Status => {
            match daemon::running_pid(&config.paths)? {
                Some(pid) => println!("Runner: running (pid {})", pid),
                None => println!("Runner: not running"),
            }
            print_stats(&JsonlStorage::new(&config.paths)).await?;
        }
        Commands::Logs { lines, follow } => daemon::tail(&config.paths.runner_log(), lines, follow).await?,
        Commands::Reset { yes } => reset(&config, yes).await?,
        Commands::TestEval {
            prompt,
            problem_prefix,
            answer_prefix,
        } => {
            let framing = framing_from_args(config.framing, prompt, problem_prefix, answer_prefix)?;
            test_eval(&config, framing).await?
        }
        Commands::TestSet { output } => test_set(&config, output.as_deref())?,
        Commands::Mcp { session } => mcp(&config, session).await?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn require_api_key(config: &Config) -> Result<String> {
    match config.api_key() {
        Some(key) => Ok(key),
        None => bail!(
            "{} is not set. Export your Anthropic API key, e.g. `export {}=sk-ant-...`",
            config.agent.api_key_env,
            config.agent.api_key_env
        ),
    }
}

async fn connect_model(config: &Config) -> Result<Arc<OllamaModel>> {
    match OllamaModel::connect(&config.model).await {
        Ok(model) => Ok(Arc::new(model)),
        Err(ModelError::Unreachable { url, .. }) => bail!(
            "Ollama is not reachable at {}. Start it with `ollama serve`.",
            url
        ),
        Err(e) => Err(e.into()),
    }
}

async fn open_evaluator(config: &Config, model: Arc<OllamaModel>) -> Result<Evaluator> {
    let storage: Arc<dyn Storage> = Arc::new(JsonlStorage::new(&config.paths));
    Ok(Evaluator::new(storage, model, config).await?)
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn log_config(config: &Config) {
    info!("Model: {} at {}", config.model.name, config.model.host);
    info!("Agent: {}", config.agent.model);
    info!("Framing: {:?}", config.framing);
    info!("Training problems per eval: {}", config.problems.train_count);
    info!("Max sessions: {}", config.runner.max_sessions);
    info!("Max retries on failure: {}", config.runner.max_retries);
    info!("Retry delay: {}s", config.runner.retry_delay_secs);
}

async fn run(config: &Config) -> Result<()> {
    let api_key = require_api_key(config)?;
    let model = connect_model(config).await?;
    log_config(config);

    let evaluator = Arc::new(open_evaluator(config, model.clone()).await?);
    let agent = Arc::new(AnthropicClient::new(&config.agent, api_key));
    let mut optimizer = OptimizationLoop::new(evaluator, agent, config);

    let report = optimizer.run_until(shutdown_signal()).await;
    if let Err(e) = model.unload().await {
        warn!("Failed to unload model: {}", e);
    }
    let report = report?;

    if let Some(accuracy) = report.last_test_accuracy {
        info!("Last test accuracy: {:.1}%", accuracy * 100.0);
    }
    match report.exit {
        LoopExit::Completed | LoopExit::Interrupted => Ok(()),
        LoopExit::Fatal(message) => bail!(message),
        LoopExit::RetriesExhausted => bail!(
            "{} consecutive failures after {} sessions",
            config.runner.max_retries,
            report.sessions_run
        ),
    }
}

async fn print_stats(storage: &JsonlStorage) -> Result<()> {
    let evaluations = storage.list_evaluations().await?;
    match best_of(&evaluations) {
        Some(best) => {
            println!("Evaluations logged: {}", evaluations.len());
            println!("Best training accuracy: {:.1}%", best.accuracy * 100.0);
        }
        None => println!("No evaluation logs yet."),
    }

    let sessions = storage.list_sessions().await?;
    if !sessions.is_empty() {
        let cost: f64 = sessions.iter().map(|s| s.estimated_cost_usd).sum();
        println!("Sessions logged: {}", sessions.len());
        println!("Total estimated cost: ${:.4}", cost);
    }

    if let Some(latest) = storage.list_test_evaluations().await?.last() {
        println!("Latest test accuracy: {:.1}%", latest.accuracy * 100.0);
    }
    Ok(())
}

async fn reset(config: &Config, yes: bool) -> Result<()> {
    let storage = JsonlStorage::new(&config.paths);
    print_stats(&storage).await?;

    if !yes {
        print!("Delete all log files and start fresh? [y/N]: ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            bail!("Aborted");
        }
    }

    storage.clear().await?;
    println!("Logs deleted. Starting fresh on next run.");
    Ok(())
}

/// Framing given on the command line, checked against the configured style.
fn framing_from_args(
    style: FramingStyle,
    prompt: Option<String>,
    problem_prefix: Option<String>,
    answer_prefix: Option<String>,
) -> Result<Option<PromptFraming>> {
    let split = problem_prefix.is_some() || answer_prefix.is_some();
    match style {
        FramingStyle::Single if split => {
            bail!("--problem-prefix/--answer-prefix need framing = \"prefix_suffix\"; use --prompt")
        }
        FramingStyle::Single => Ok(prompt.map(PromptFraming::single)),
        FramingStyle::PrefixSuffix if prompt.is_some() => {
            bail!("--prompt needs framing = \"single\"; use --problem-prefix/--answer-prefix")
        }
        FramingStyle::PrefixSuffix if split => Ok(Some(PromptFraming::prefix_suffix(
            problem_prefix.unwrap_or_default(),
            answer_prefix.unwrap_or_default(),
        ))),
        FramingStyle::PrefixSuffix => Ok(None),
    }
}

async fn test_eval(config: &Config, framing: Option<PromptFraming>) -> Result<()> {
    let model = connect_model(config).await?;
    let evaluator = open_evaluator(config, model.clone()).await?;

    let framing = match framing {
        Some(framing) => framing,
        None => evaluator
            .storage()
            .best_evaluation()
            .await?
            .map(|best| best.framing)
            .context("No evaluations logged yet; pass the prompt to test")?,
    };

    println!("Prompt:\n---\n{}\n---", framing);
    let score = evaluator.evaluate_held_out(&framing).await?;
    println!("Test {}", score);

    if let Err(e) = model.unload().await {
        warn!("Failed to unload model: {}", e);
    }
    Ok(())
}

fn test_set(config: &Config, output: Option<&Path>) -> Result<()> {
    let problems = generate_test_problems_seeded(config.problems.test_count, config.problems.test_seed);
    let json = serde_json::to_string_pretty(&problems)?;
    match output {
        Some(path) => {
            std::fs::write(path, json + "\n").with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} problems to {}", problems.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn mcp(config: &Config, session: Option<u64>) -> Result<()> {
    let model = connect_model(config).await?;
    let evaluator = Arc::new(open_evaluator(config, model).await?);

    let session = match session {
        Some(n) => SessionId::new(n),
        None => evaluator
            .storage()
            .last_session()
            .await?
            .map(SessionId::next)
            .unwrap_or(SessionId::FIRST),
    };

    let tool = EvaluatePromptTool::new(evaluator, config.framing, config.problems.train_count);
    let server = McpServer::new(Toolbox::new().with(Arc::new(tool)), session);
    server.serve_stdio().await?;
    Ok(())
}
