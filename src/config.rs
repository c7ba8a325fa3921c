//! # Configuration
//!
//! Loaded from environment variables (and a `.env` file, if present), then
//! overridden by command-line flags in `main.rs`.
//!
//! | variable                   | default                   |
//! |----------------------------|---------------------------|
//! | `JOCKEY_PROVIDER`          | `ollama`                  |
//! | `JOCKEY_MODEL`             | `llama3.2`                |
//! | `OLLAMA_API_BASE_URL`      | `http://localhost:11434`  |
//! | `JOCKEY_TEMPERATURE`       | `0.0`                     |
//! | `JOCKEY_TOOLS_URL`         | `http://localhost:8000`   |
//! | `JOCKEY_TOOLS_API_KEY`     | unset                     |
//! | `JOCKEY_CHECKPOINT_DIR`    | unset (in memory)         |
//! | `JOCKEY_ARTIFACT_DIR`      | unset (in memory)         |
//! | `JOCKEY_REVIEW`            | `false`                   |
//! | `JOCKEY_MAX_STEPS`         | `100`                     |
//! | `JOCKEY_NODE_TIMEOUT_SECS` | `300`                     |
//! | `JOCKEY_CONTINUE_ON_TOOL_ERROR` | `false`              |

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jockey_graph::{CheckpointerConfig, EngineConfig, ErrorAction};

/// Where the decision service's language model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Ollama,
    Openai,
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        <Provider as ValueEnum>::from_str(s, true)
            .map_err(|_| anyhow::anyhow!("unknown provider `{s}` (expected ollama or openai)"))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: Provider,

    pub model: String,

    /// Ollama server URL
    pub ollama_host: String,

    pub temperature: f64,

    /// Base URL of the video tool service
    pub tools_url: String,

    pub tools_api_key: Option<String>,

    /// Durable checkpoints; sessions can be continued across restarts
    pub checkpoint_dir: Option<PathBuf>,

    /// Durable artifact cache for rendered clips and edits
    pub artifact_dir: Option<PathBuf>,

    /// Pause for human review after every worker step
    pub review: bool,

    pub max_steps: usize,

    pub node_timeout: Duration,

    /// Report tool failures to the reflector instead of halting
    pub continue_on_tool_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "llama3.2".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            // Routing decisions must be reproducible
            temperature: 0.0,
            tools_url: "http://localhost:8000".to_string(),
            tools_api_key: None,
            checkpoint_dir: None,
            artifact_dir: None,
            review: false,
            max_steps: 100,
            node_timeout: Duration::from_secs(300),
            continue_on_tool_error: false,
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{name} has an invalid value: {val}")),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Some(val) = parse_var("JOCKEY_PROVIDER")? {
            config.provider = val;
        }
        if let Ok(val) = env::var("JOCKEY_MODEL") {
            config.model = val;
        }
        if let Ok(val) = env::var("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }
        if let Some(val) = parse_var("JOCKEY_TEMPERATURE")? {
            config.temperature = val;
        }
        if let Ok(val) = env::var("JOCKEY_TOOLS_URL") {
            config.tools_url = val;
        }
        config.tools_api_key = env::var("JOCKEY_TOOLS_API_KEY").ok();
        config.checkpoint_dir = env::var_os("JOCKEY_CHECKPOINT_DIR").map(PathBuf::from);
        config.artifact_dir = env::var_os("JOCKEY_ARTIFACT_DIR").map(PathBuf::from);
        if let Some(val) = parse_var("JOCKEY_REVIEW")? {
            config.review = val;
        }
        if let Some(val) = parse_var("JOCKEY_MAX_STEPS")? {
            config.max_steps = val;
        }
        if let Some(secs) = parse_var::<u64>("JOCKEY_NODE_TIMEOUT_SECS")? {
            config.node_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = parse_var("JOCKEY_CONTINUE_ON_TOOL_ERROR")? {
            config.continue_on_tool_error = val;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.temperature
            );
        }

        if self.model.is_empty() {
            anyhow::bail!("JOCKEY_MODEL cannot be empty");
        }

        if self.max_steps == 0 {
            anyhow::bail!("JOCKEY_MAX_STEPS must be at least 1");
        }

        if self.node_timeout.is_zero() {
            anyhow::bail!("JOCKEY_NODE_TIMEOUT_SECS must be at least 1");
        }

        if !self.tools_url.starts_with("http://") && !self.tools_url.starts_with("https://") {
            anyhow::bail!("JOCKEY_TOOLS_URL must be an http(s) URL, got: {}", self.tools_url);
        }

        if self.provider == Provider::Openai && env::var("OPENAI_API_KEY").is_err() {
            anyhow::bail!("OPENAI_API_KEY must be set to use the openai provider");
        }

        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let action = if self.continue_on_tool_error {
            ErrorAction::ReportAndContinue
        } else {
            ErrorAction::Halt
        };
        EngineConfig::default()
            .with_max_steps(self.max_steps)
            .with_node_timeout(self.node_timeout)
            .with_external_call_action(action)
    }

    pub fn checkpointer_config(&self) -> CheckpointerConfig {
        match &self.checkpoint_dir {
            Some(path) => CheckpointerConfig::File {
                path: path.clone(),
                compression: true,
            },
            None => CheckpointerConfig::Memory,
        }
    }
}
