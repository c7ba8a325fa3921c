//! # Jockey
//!
//! A conversational video agent. Each turn goes through a checkpointed
//! graph: supervisor, planner, tool-calling workers (search, text
//! generation, editing) and a reflector that writes the reply.
//!
//! ## Quick Start
//! ```bash
//! cargo run -- "Find two clips of a slam dunk and combine them"
//! ```

/// Configuration management
mod config;

/// Interactive agent loop
mod agent;

use anyhow::Result;
use clap::Parser;
use std::io::Write as _;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use jockey_graph::jockey::{build_jockey_graph, JockeyDeps, JockeyOptions};
use jockey_graph::{MemoryArtifactStore, ScriptedDecisionService, ScriptedToolExecutor};

use crate::agent::JockeyAgent;
use crate::config::{Config, Provider};

#[derive(Parser, Debug)]
#[command(
    name = "jockey",
    version,
    about = "A conversational agent that searches, describes and edits video",
    long_about = r#"
Jockey plans multi-step video tasks and carries them out through a video
tool service: clip search, text generation and editing.

Without a MESSAGE it starts an interactive conversation. Sessions are
checkpointed after every step; with --checkpoint-dir they survive restarts
and can be continued with --session.

EXAMPLES:
  # One-shot request
  jockey "find 2 dunking videos in the index 670514a1e5620307b898b0c5"

  # Review every worker output before continuing
  jockey --review

  # Continue an earlier session
  jockey --checkpoint-dir ./sessions --session 3f0c... "now combine them"
"#
)]
struct Args {
    /// First message; omit for an interactive conversation
    #[arg(value_name = "MESSAGE")]
    message: Option<String>,

    /// Model name (overrides JOCKEY_MODEL)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Model provider (overrides JOCKEY_PROVIDER)
    #[arg(long = "provider", value_enum)]
    provider: Option<Provider>,

    /// Video tool service URL (overrides JOCKEY_TOOLS_URL)
    #[arg(long = "tools-url")]
    tools_url: Option<String>,

    /// Directory for durable checkpoints (overrides JOCKEY_CHECKPOINT_DIR)
    #[arg(long = "checkpoint-dir")]
    checkpoint_dir: Option<PathBuf>,

    /// Continue an existing session
    #[arg(short = 's', long = "session")]
    session: Option<String>,

    /// Pause for review after every worker step
    #[arg(short = 'r', long = "review", default_value = "false")]
    review: bool,

    /// Print the agent graph as a Mermaid diagram and exit
    #[arg(long = "describe", default_value = "false")]
    describe: bool,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    if args.describe {
        println!("{}", describe_graph()?);
        return Ok(());
    }

    let mut config = Config::from_env()?;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(url) = args.tools_url {
        config.tools_url = url;
    }
    if let Some(dir) = args.checkpoint_dir {
        config.checkpoint_dir = Some(dir);
    }
    config.review |= args.review;
    config.validate()?;

    let mut agent = JockeyAgent::new(&config, args.session).await?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    if let Some(message) = args.message {
        agent.turn(&message, &mut stdin).await?;
    } else {
        println!("Jockey is ready. Empty line or Ctrl-D to quit.");
        loop {
            print!("> ");
            std::io::stdout().flush()?;
            let Some(line) = stdin.next_line().await? else { break };
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            agent.turn(line, &mut stdin).await?;
        }
    }

    if let Some(id) = agent.session_id() {
        info!(session_id = %id, "Session saved");
        eprintln!("session: {id}");
    }
    Ok(())
}

/// The graph does not depend on the services behind it, so scripted
/// stand-ins are enough to render it.
fn describe_graph() -> Result<String> {
    let deps = JockeyDeps {
        decisions: std::sync::Arc::new(ScriptedDecisionService::new()),
        tools: std::sync::Arc::new(ScriptedToolExecutor::new()),
        artifacts: std::sync::Arc::new(MemoryArtifactStore::new()),
    };
    Ok(build_jockey_graph(deps, JockeyOptions::default())?.describe())
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
