//! Engine configuration
//!
//! Step caps, timeouts, concurrency and error policy for the executor and
//! session manager.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ErrorAction, ErrorPolicy};

/// Executor and session manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum node invocations in one run before it fails with
    /// resource exhaustion
    pub max_steps: usize,

    /// Timeout for an individual node invocation
    #[serde(with = "humantime_serde")]
    pub node_timeout: Duration,

    /// Timeout for an entire run
    #[serde(with = "humantime_serde")]
    pub run_timeout: Duration,

    /// Maximum runs executing at once across all sessions
    pub max_concurrent_runs: usize,

    /// Checkpoints kept per session (0 = keep all)
    pub checkpoint_retention: usize,

    /// How classified failures are handled
    pub error_policy: ErrorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            node_timeout: Duration::from_secs(300), // 5 min per node
            run_timeout: Duration::from_secs(3600), // 1 hour per run
            max_concurrent_runs: num_cpus::get(),
            checkpoint_retention: 0,
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum node invocations per run
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    /// Set node timeout
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Set run timeout
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Set the concurrent run limit
    pub fn with_max_concurrent_runs(mut self, runs: usize) -> Self {
        self.max_concurrent_runs = runs.max(1);
        self
    }

    /// Keep only the latest `keep` checkpoints per session (0 = keep all)
    pub fn with_checkpoint_retention(mut self, keep: usize) -> Self {
        self.checkpoint_retention = keep;
        self
    }

    /// Set the action taken on external-call failures
    pub fn with_external_call_action(mut self, action: ErrorAction) -> Self {
        self.error_policy.external_call = action;
        self
    }
}
