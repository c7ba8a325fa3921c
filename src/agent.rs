//! # Interactive agent
//!
//! Wires the decision service, tool executor, artifact store and
//! checkpointer into a [`SessionManager`] and drives one conversation from
//! the terminal. Ctrl-C cancels the turn in flight; the session stays
//! resumable.

use anyhow::{Context, Result};
use futures::StreamExt;
use rig::client::{CompletionClient, ProviderClient};
use rig::providers::{ollama, openai};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info, warn};

use jockey_graph::jockey::{
    build_jockey_graph, prompts, JockeyDeps, JockeyNode, JockeyOptions, SessionState, SessionUpdate,
};
use jockey_graph::{
    create_checkpointer, ArtifactStore, DecisionService, ExecutionEvent, Executor,
    FileArtifactStore, HttpToolExecutor, MemoryArtifactStore, RigDecisionService, RunHandle,
    SessionManager, Target,
};

use crate::config::{Config, Provider};

type Event = ExecutionEvent<SessionState, JockeyNode>;

/// Build the decision service for the configured provider.
fn decision_service(config: &Config) -> Arc<dyn DecisionService> {
    match config.provider {
        Provider::Ollama => {
            std::env::set_var("OLLAMA_API_BASE_URL", &config.ollama_host);
            let agent = ollama::Client::from_env()
                .agent(&config.model)
                .preamble(prompts::PREAMBLE)
                .temperature(config.temperature)
                .build();
            Arc::new(RigDecisionService::new(agent, "ollama"))
        }
        Provider::Openai => {
            let agent = openai::Client::from_env()
                .agent(&config.model)
                .preamble(prompts::PREAMBLE)
                .temperature(config.temperature)
                .build();
            Arc::new(RigDecisionService::new(agent, "openai"))
        }
    }
}

fn artifact_store(config: &Config) -> Arc<dyn ArtifactStore> {
    match &config.artifact_dir {
        Some(dir) => Arc::new(FileArtifactStore::new(dir)),
        None => Arc::new(MemoryArtifactStore::new()),
    }
}

pub struct JockeyAgent {
    sessions: SessionManager<SessionState, JockeyNode>,
    session_id: Option<String>,
}

impl JockeyAgent {
    pub async fn new(config: &Config, session_id: Option<String>) -> Result<Self> {
        let mut tools = HttpToolExecutor::new(&config.tools_url);
        if let Some(key) = &config.tools_api_key {
            tools = tools.with_api_key(key);
        }

        let deps = JockeyDeps {
            decisions: decision_service(config),
            tools: Arc::new(tools),
            artifacts: artifact_store(config),
        };
        let options = JockeyOptions::default().with_review(config.review);
        let graph = build_jockey_graph(deps, options).context("Failed to build agent graph")?;

        let checkpointer = create_checkpointer(config.checkpointer_config())
            .await
            .context("Failed to open checkpoint store")?;
        let executor = Executor::new(graph, checkpointer).with_config(config.engine_config());

        info!(
            provider = ?config.provider,
            model = %config.model,
            review = config.review,
            "Agent ready"
        );
        Ok(Self {
            sessions: SessionManager::new(executor),
            session_id,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Run one user turn, including any review rounds it triggers.
    pub async fn turn(&mut self, input: &str, stdin: &mut Lines<BufReader<Stdin>>) -> Result<()> {
        let update = SessionUpdate::user_input(input);
        let mut handle = match &self.session_id {
            Some(id) => self.sessions.send(id, update).await?,
            None => self.sessions.start(update)?,
        };
        self.session_id = Some(handle.session_id.clone());

        loop {
            let Some(event) = self.follow(handle).await? else {
                warn!("Run ended without a terminal event");
                return Ok(());
            };

            match event {
                ExecutionEvent::Completed { state, .. } => {
                    print_reply(&state);
                    return Ok(());
                }
                ExecutionEvent::Failed { error, .. } => {
                    eprintln!("\nTurn failed: {error}");
                    eprintln!("Send another message to retry from the failed step.");
                    return Ok(());
                }
                ExecutionEvent::Interrupted { .. } => {
                    eprintln!("\nTurn cancelled. Send another message to continue.");
                    return Ok(());
                }
                ExecutionEvent::Paused { session_id, state, .. } => {
                    let Some(review) = state.open_feedback() else {
                        return Ok(());
                    };
                    println!("\n--- {} output ---\n{}", review.origin_node, review.origin_content);
                    println!("Feedback (empty line to rerun the step):");
                    let feedback = stdin.next_line().await?.unwrap_or_default();
                    let patch = state.answer_feedback(&feedback).unwrap_or_default();
                    match self.sessions.resume(&session_id, patch).await? {
                        Some(next) => handle = next,
                        None => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Print progress until the terminal event. Ctrl-C cancels the run.
    async fn follow(&self, handle: RunHandle<SessionState, JockeyNode>) -> Result<Option<Event>> {
        let RunHandle { session_id, mut events } = handle;
        let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else { return Ok(None) };
                    if event.is_terminal() {
                        return Ok(Some(event));
                    }
                    report_progress(&event);
                }
                signal = &mut ctrl_c => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    if self.sessions.cancel(&session_id) {
                        eprintln!("\nCancelling after the current step...");
                    }
                    ctrl_c.set(tokio::signal::ctrl_c());
                }
            }
        }
    }
}

fn report_progress(event: &Event) {
    match event {
        ExecutionEvent::NodeStarted { node, .. } => debug!(node = %node, "Node started"),
        ExecutionEvent::NodeCompleted {
            node,
            next: Target::Node(next),
            ..
        } => println!("  {node} -> {next}"),
        ExecutionEvent::ErrorReported { error, .. } => eprintln!("  ! {error}"),
        _ => {}
    }
}

/// Latest message written by the reflector.
fn latest_reply(state: &SessionState) -> Option<&str> {
    state
        .history
        .iter()
        .rev()
        .find(|message| message.name.as_deref() == Some(JockeyNode::Reflect.as_str()))
        .map(|message| message.content.as_str())
}

fn print_reply(state: &SessionState) {
    if let Some(reply) = latest_reply(state) {
        println!("\n{reply}\n");
    }
}
