//! Fleet configuration: `.octopoid/agents.yaml`, a list of agent blueprints.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Spawn mode of a blueprint. Selects the spawn strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlueprintKind {
    /// Task-specific worktree, direct subprocess. Claims tasks.
    Implementer,
    /// No worktree; runs in the parent repository directory. Never claims.
    Lightweight,
    /// Blueprint-named worktree shared across the blueprint's tasks.
    /// Claims tasks (gatekeepers, reviewers).
    Worktree,
}

impl fmt::Display for BlueprintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Implementer => "implementer",
            Self::Lightweight => "lightweight",
            Self::Worktree => "worktree",
        };
        f.write_str(s)
    }
}

/// A blueprint: the template agent instances are spawned from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BlueprintKind,
    pub role: String,
    /// The agent command line. The first element is the program.
    pub command: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Queue claimed from; reviewer blueprints claim from `provisional`.
    #[serde(default)]
    pub claim_queue: Option<String>,
    /// Optional command whose exit code gates spawning.
    #[serde(default)]
    pub pre_check: Option<String>,
    /// Template directory under `agents/`; defaults to the blueprint name.
    #[serde(default)]
    pub agent_dir: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_instances() -> usize {
    1
}

fn default_interval_seconds() -> u64 {
    60
}

impl Blueprint {
    /// Whether this blueprint claims tasks before spawning.
    pub fn claims_tasks(&self) -> bool {
        self.kind != BlueprintKind::Lightweight
    }

    /// Queue this blueprint claims from.
    pub fn claim_queue(&self) -> &str {
        self.claim_queue
            .as_deref()
            .unwrap_or(octopoid_db::models::queue::INCOMING)
    }

    /// Template directory name under `agents/`.
    pub fn agent_dir(&self) -> &str {
        self.agent_dir.as_deref().unwrap_or(&self.name)
    }
}

/// The fleet: every blueprint this orchestrator evaluates, in declaration
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub blueprints: Vec<Blueprint>,
}

impl FleetConfig {
    /// Load from a YAML file and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fleet config at {}", path.display()))?;
        let fleet: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse fleet config at {}", path.display()))?;
        fleet.validate()?;
        Ok(fleet)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for blueprint in &self.blueprints {
            if !seen.insert(blueprint.name.as_str()) {
                anyhow::bail!("duplicate blueprint name {:?}", blueprint.name);
            }
            if blueprint.command.is_empty() {
                anyhow::bail!("blueprint {:?} has an empty command", blueprint.name);
            }
            if blueprint.max_instances == 0 {
                anyhow::bail!("blueprint {:?} has max_instances 0", blueprint.name);
            }
        }
        Ok(())
    }

    /// The distinct roles served by claimable blueprints, for role
    /// registration with the server.
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self
            .blueprints
            .iter()
            .filter(|b| b.claims_tasks())
            .map(|b| b.role.clone())
            .collect();
        roles.sort();
        roles.dedup();
        roles
    }
}
