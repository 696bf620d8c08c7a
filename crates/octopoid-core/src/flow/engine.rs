//! The flow engine: evaluates a transition's conditions in order and, when
//! they all hold, executes its named steps.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use octopoid_db::models::{ConditionDef, ConditionKind, FlowTransitionDef, Task};

use crate::client::ApiClient;
use crate::flow::steps::{StepContext, StepRegistry};
use crate::flow::FlowOutcome;
use crate::result::ReviewDecision;

/// How a single condition came out.
enum ConditionStatus {
    Satisfied,
    /// Decided and not satisfied: routes via `on_fail` or blocks.
    Unsatisfied { reason: String },
    /// Cannot be decided yet (no reviewer decision, no approval). Always
    /// blocks, regardless of `on_fail`.
    Pending { reason: String },
}

/// Evaluates conditions and executes runs for flow transitions.
pub struct FlowEngine<'a> {
    client: &'a ApiClient,
    script_timeout: Duration,
}

impl<'a> FlowEngine<'a> {
    pub fn new(client: &'a ApiClient, script_timeout: Duration) -> Self {
        Self {
            client,
            script_timeout,
        }
    }

    /// Evaluate a transition's conditions in declared order. The first
    /// unsatisfied condition short-circuits.
    pub async fn evaluate(
        &self,
        transition: &FlowTransitionDef,
        task: &Task,
        working_dir: &Path,
    ) -> Result<FlowOutcome> {
        for condition in &transition.conditions {
            match self.check(condition, task, working_dir).await? {
                ConditionStatus::Satisfied => {}
                ConditionStatus::Pending { reason } => {
                    return Ok(FlowOutcome::Block { reason });
                }
                ConditionStatus::Unsatisfied { reason } => {
                    return Ok(match &condition.on_fail {
                        Some(state) => FlowOutcome::FailTo {
                            state: state.clone(),
                        },
                        None => FlowOutcome::Block { reason },
                    });
                }
            }
        }

        Ok(FlowOutcome::Advance)
    }

    async fn check(
        &self,
        condition: &ConditionDef,
        task: &Task,
        working_dir: &Path,
    ) -> Result<ConditionStatus> {
        match condition.kind {
            ConditionKind::Script => {
                let command = condition
                    .command
                    .as_deref()
                    .context("script condition has no command")?;
                Ok(self.run_script(command, task, working_dir).await)
            }
            ConditionKind::Agent => {
                let role = condition.role.as_deref().unwrap_or("review");
                let decision = self.client.list_messages(&task.id, Some("decision")).await?;
                match decision.last() {
                    None => Ok(ConditionStatus::Pending {
                        reason: format!("awaiting {role} decision for {}", task.id),
                    }),
                    Some(message) => {
                        let decision: Option<ReviewDecision> = message
                            .content
                            .get("decision")
                            .and_then(|d| serde_json::from_value(d.clone()).ok());
                        match decision {
                            Some(ReviewDecision::Approve) => Ok(ConditionStatus::Satisfied),
                            Some(ReviewDecision::Reject) => Ok(ConditionStatus::Unsatisfied {
                                reason: format!("{role} rejected {}", task.id),
                            }),
                            None => Ok(ConditionStatus::Pending {
                                reason: format!(
                                    "decision message for {} carries no verdict",
                                    task.id
                                ),
                            }),
                        }
                    }
                }
            }
            ConditionKind::Manual => {
                let approvals = self.client.list_messages(&task.id, Some("approval")).await?;
                if approvals.is_empty() {
                    Ok(ConditionStatus::Pending {
                        reason: format!("awaiting human approval for {}", task.id),
                    })
                } else {
                    Ok(ConditionStatus::Satisfied)
                }
            }
        }
    }

    /// Run a script condition: exit code 0 means satisfied. A script that
    /// cannot be started or overruns its budget is an unsatisfied condition,
    /// not an engine error.
    async fn run_script(&self, command: &str, task: &Task, working_dir: &Path) -> ConditionStatus {
        let future = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .env("TASK_ID", &task.id)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.script_timeout, future).await {
            Err(_) => ConditionStatus::Unsatisfied {
                reason: format!("script {command:?} timed out"),
            },
            Ok(Err(e)) => ConditionStatus::Unsatisfied {
                reason: format!("script {command:?} failed to start: {e}"),
            },
            Ok(Ok(output)) if output.status.success() => ConditionStatus::Satisfied,
            Ok(Ok(output)) => ConditionStatus::Unsatisfied {
                reason: format!(
                    "script {command:?} exited {}",
                    output.status.code().unwrap_or(-1)
                ),
            },
        }
    }

    /// Execute a transition's `runs` in order. Any step failure aborts the
    /// remaining steps and routes the task to the step's `on_fail` queue.
    pub async fn execute_runs(
        &self,
        transition: &FlowTransitionDef,
        registry: &StepRegistry,
        ctx: &mut StepContext,
    ) -> Result<FlowOutcome> {
        for step_name in &transition.runs {
            let Some(step) = registry.get(step_name) else {
                anyhow::bail!("flow references unknown step {step_name:?}");
            };

            match step.run(ctx).await {
                Ok(metadata) => {
                    tracing::info!(
                        task_id = %ctx.task.id,
                        step = step_name,
                        %metadata,
                        "step completed"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %ctx.task.id,
                        step = step_name,
                        error = %e,
                        "step failed, aborting transition"
                    );
                    return Ok(FlowOutcome::FailTo {
                        state: step.on_fail().to_string(),
                    });
                }
            }
        }

        Ok(FlowOutcome::Advance)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
