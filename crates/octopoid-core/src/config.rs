//! Orchestrator host configuration: `.octopoid/config.yaml`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for one orchestrator installation.
///
/// Resolution chain for the server URL: `OCTOPOID_SERVER_URL` env var, then
/// the config file value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub server_url: String,
    pub cluster: String,
    pub machine_id: String,
    /// Base branch agent worktrees start from when a task does not name one.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Fleet definition file, relative to `.octopoid/`.
    #[serde(default = "default_fleet")]
    pub fleet: String,
    /// Repository URL advertised on registration.
    #[serde(default)]
    pub repo_url: String,
    /// System-wide cap on concurrently claimed tasks (backpressure guard).
    #[serde(default = "default_max_claimed")]
    pub max_claimed: i64,
    /// System-wide cap on open PRs (backpressure guard).
    #[serde(default = "default_max_open_prs")]
    pub max_open_prs: i64,
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_fleet() -> String {
    "agents.yaml".to_string()
}

fn default_max_claimed() -> i64 {
    8
}

fn default_max_open_prs() -> i64 {
    10
}

impl OrchestratorConfig {
    /// Load from a YAML file, applying the env-var override for the server
    /// URL.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        if let Ok(url) = std::env::var("OCTOPOID_SERVER_URL") {
            config.server_url = url;
        }

        Ok(config)
    }

    /// The orchestrator id: `<cluster>-<machine_id>`.
    pub fn orchestrator_id(&self) -> String {
        format!("{}-{}", self.cluster, self.machine_id)
    }
}
