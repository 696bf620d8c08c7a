//! Declarative flows: the state machine definitions driving tasks from
//! `provisional` toward `done`.

pub mod engine;
pub mod steps;

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use octopoid_db::models::{queue, ConditionDef, ConditionKind, FlowTransitionDef};

/// A flow document as authored in `.octopoid/flows/*.yaml` and registered
/// with the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDocument {
    pub name: String,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    pub states: Vec<String>,
    pub transitions: Vec<FlowTransitionDef>,
}

fn default_cluster() -> String {
    "default".to_string()
}

impl FlowDocument {
    /// Load a flow document from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read flow at {}", path.display()))?;
        let flow: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse flow at {}", path.display()))?;
        Ok(flow)
    }

    /// The first declared transition out of `from`, if any.
    pub fn transition_from(&self, from: &str) -> Option<&FlowTransitionDef> {
        self.transitions.iter().find(|t| t.from == from)
    }

    /// The flow installed by default: implementer work is reviewed by a
    /// test-script condition, then pushed and PR'd on acceptance.
    pub fn default_flow() -> Self {
        Self {
            name: "default".to_string(),
            cluster: "default".to_string(),
            states: queue::BUILT_IN.iter().map(|s| s.to_string()).collect(),
            transitions: vec![FlowTransitionDef {
                from: queue::PROVISIONAL.to_string(),
                to: queue::DONE.to_string(),
                agent: None,
                runs: vec![
                    "push_branch".to_string(),
                    "run_tests".to_string(),
                    "create_pr".to_string(),
                ],
                conditions: vec![ConditionDef {
                    kind: ConditionKind::Script,
                    command: Some("scripts/run-tests".to_string()),
                    role: None,
                    on_fail: Some(queue::INCOMING.to_string()),
                }],
            }],
        }
    }
}

/// Outcome of evaluating a flow transition for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Every condition is satisfied; the transition may run its steps and
    /// land the task in the destination state.
    Advance,
    /// A condition cannot be decided yet (reviewer not done, approval not
    /// given). The task stays where it is.
    Block { reason: String },
    /// A condition or step failed; route the task to this state.
    FailTo { state: String },
}
