//! Phase A of the tick: presence, result collection, lease observation, and
//! flow-driven work on provisional tasks.
//!
//! Every job is wrapped by the tick so one failure never blocks the rest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use octopoid_db::models::{queue, SchedulerSnapshot, Task};

use crate::client::{ApiClient, ClientError};
use crate::config::OrchestratorConfig;
use crate::fleet::FleetConfig;
use crate::flow::engine::FlowEngine;
use crate::flow::steps::{StepContext, StepRegistry};
use crate::flow::{FlowDocument, FlowOutcome};
use crate::layout::ProjectLayout;
use crate::pool_tracker::PoolTracker;
use crate::process::pid_alive;
use crate::result::{read_result, ResultArtifact, ResultOutcome};
use crate::scheduler::TickOptions;
use crate::worktree::WorktreeManager;

/// Collaborators shared by the housekeeping jobs.
pub struct Housekeeping<'a> {
    pub client: &'a ApiClient,
    pub layout: &'a ProjectLayout,
    pub config: &'a OrchestratorConfig,
    pub fleet: &'a FleetConfig,
    pub options: &'a TickOptions,
}

impl Housekeeping<'_> {
    /// Register (or refresh) this orchestrator and declare its fleet roles.
    /// Registration doubles as the heartbeat.
    pub async fn register_and_heartbeat(&self) -> Result<()> {
        let orchestrator = self
            .client
            .register_orchestrator(
                &self.config.cluster,
                &self.config.machine_id,
                &self.config.repo_url,
            )
            .await?;

        std::fs::write(self.layout.orchestrator_id_path(), &orchestrator.id)
            .context("failed to write orchestrator_id.txt")?;

        let roles = self.fleet.roles();
        if !roles.is_empty() {
            self.client.register_roles(&roles, &self.config.cluster).await?;
        }

        Ok(())
    }

    /// Collect results from dead agent processes and drive their tasks
    /// through the matching transitions. Returns how many instances were
    /// collected.
    pub async fn collect_results(&self) -> Result<usize> {
        let mut collected = 0;

        for blueprint in &self.fleet.blueprints {
            let pids_path = self.layout.blueprint_pids_path(&blueprint.name);
            let mut tracker = PoolTracker::load(&pids_path)?;

            for (instance, entry) in tracker.finished(pid_alive) {
                let Some(task_id) = entry.task_id.clone() else {
                    // Lightweight instances carry no task; just reap.
                    tracker.remove(&instance)?;
                    collected += 1;
                    continue;
                };

                let result_path = self.layout.task_result_path(&task_id);
                let artifact = match read_result(&result_path) {
                    Ok(Some(artifact)) => artifact,
                    Ok(None) => {
                        // Dead without a result: give the filesystem a grace
                        // window, then synthesize a failure.
                        if Utc::now() - entry.started_at < self.options.zombie_grace {
                            continue;
                        }
                        tracing::warn!(
                            task_id = %task_id,
                            instance = %instance,
                            "agent died without a result, synthesizing failure"
                        );
                        ResultArtifact::synthesized_failure("no result")
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %task_id, error = %e, "malformed result");
                        ResultArtifact::synthesized_failure(format!("malformed result: {e:#}"))
                    }
                };

                match self.process_result(&instance, &task_id, &artifact).await {
                    Ok(()) => {
                        tracker.remove(&instance)?;
                        collected += 1;
                    }
                    Err(e) if e.is_retriable() => {
                        // Server hiccup: keep the entry, retry next tick.
                        tracing::warn!(
                            task_id = %task_id,
                            error = %e,
                            "result processing failed, will retry"
                        );
                    }
                    Err(e) => {
                        // wrong_state / not_found: the lease expired (or the
                        // task is gone) and this result is stale. Drop it.
                        tracing::warn!(
                            task_id = %task_id,
                            instance = %instance,
                            error = %e,
                            "dropping stale result"
                        );
                        tracker.remove(&instance)?;
                        collected += 1;
                    }
                }
            }
        }

        Ok(collected)
    }

    /// Apply one result to the server. Ownership is re-checked against the
    /// live task so a lease that expired mid-run drops the stale result
    /// instead of submitting it.
    async fn process_result(
        &self,
        instance: &str,
        task_id: &str,
        artifact: &ResultArtifact,
    ) -> Result<(), ClientError> {
        let task = self.client.get_task(task_id).await?;

        if task.queue != queue::CLAIMED || task.claimed_by.as_deref() != Some(instance) {
            return Err(ClientError::WrongState(format!(
                "task {task_id} is no longer claimed by {instance}"
            )));
        }

        // Reviewer results: record the decision durably, then release the
        // task back to its re-entry queue for the flow engine to act on.
        if let Some(decision) = artifact.decision {
            self.client
                .post_message(
                    task_id,
                    instance,
                    "decision",
                    serde_json::json!({
                        "decision": decision,
                        "comment": artifact.comment,
                        "reason": artifact.reason,
                    }),
                )
                .await?;
            self.client
                .requeue(task_id, task.version, instance, "review complete")
                .await?;
            return Ok(());
        }

        match artifact.outcome {
            ResultOutcome::Done => {
                self.client
                    .submit(
                        task_id,
                        task.version,
                        instance,
                        artifact.commits_count,
                        artifact.turns_used,
                        artifact.reason.as_deref(),
                    )
                    .await?;
            }
            ResultOutcome::Failed => {
                let reason = artifact.reason.as_deref().unwrap_or("agent failed");
                self.client
                    .fail(task_id, task.version, instance, reason)
                    .await?;
            }
            ResultOutcome::NeedsContinuation => {
                self.client
                    .post_message(
                        task_id,
                        instance,
                        "note",
                        serde_json::json!({
                            "needs_continuation": true,
                            "reason": artifact.reason,
                        }),
                    )
                    .await?;
                let reason = artifact.reason.as_deref().unwrap_or("needs continuation");
                self.client
                    .requeue(task_id, task.version, instance, reason)
                    .await?;
            }
        }

        Ok(())
    }

    /// Local lease bookkeeping: spot agents still running after their task's
    /// lease was lost. Their eventual results will be dropped at collection;
    /// this just makes the situation visible early. Returns the number of
    /// lost leases observed.
    pub async fn observe_leases(&self) -> Result<usize> {
        let mut lost = 0;
        let our_id = self.config.orchestrator_id();

        for blueprint in &self.fleet.blueprints {
            let tracker = PoolTracker::load(&self.layout.blueprint_pids_path(&blueprint.name))?;

            for (instance, entry) in tracker.iter() {
                let Some(ref task_id) = entry.task_id else {
                    continue;
                };
                if !pid_alive(entry.pid) {
                    continue;
                }

                match self.client.get_task(task_id).await {
                    Ok(task) => {
                        let still_ours = task.queue == queue::CLAIMED
                            && task.orchestrator.as_deref() == Some(our_id.as_str());
                        if !still_ours {
                            lost += 1;
                            tracing::warn!(
                                task_id = %task_id,
                                instance = %instance,
                                queue = %task.queue,
                                "lease lost while agent still running; its result will be dropped"
                            );
                        }
                    }
                    Err(ClientError::NotFound(_)) => {
                        lost += 1;
                        tracing::warn!(
                            task_id = %task_id,
                            instance = %instance,
                            "task vanished while agent still running"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(task_id = %task_id, error = %e, "lease observation skipped");
                    }
                }
            }
        }

        Ok(lost)
    }

    /// Drive provisional tasks through their flow: evaluate conditions,
    /// execute runs, then accept or reject. Returns how many tasks moved.
    pub async fn process_provisional(
        &self,
        snapshot: &SchedulerSnapshot,
        registry: &StepRegistry,
    ) -> Result<usize> {
        let engine = FlowEngine::new(self.client, self.options.script_timeout);
        let mut moved = 0;

        for task in &snapshot.provisional {
            if task.paused {
                continue;
            }

            let flow = self.load_flow(task);
            let actor = format!("flow:{}", flow.name);

            let Some(transition) = flow.transition_from(queue::PROVISIONAL) else {
                tracing::debug!(task_id = %task.id, flow = %flow.name, "no provisional transition");
                continue;
            };

            if transition.to != queue::DONE {
                tracing::warn!(
                    task_id = %task.id,
                    flow = %flow.name,
                    to = %transition.to,
                    "unsupported provisional transition target, skipping"
                );
                continue;
            }

            let worktree_dir = self.layout.task_worktree_dir(&task.id);
            let worktree = worktree_dir.is_dir().then_some(worktree_dir);
            let working_dir: PathBuf = worktree
                .clone()
                .unwrap_or_else(|| self.layout.root().to_path_buf());

            match engine.evaluate(transition, task, &working_dir).await? {
                FlowOutcome::Block { reason } => {
                    tracing::debug!(task_id = %task.id, reason = %reason, "flow blocked");
                }
                FlowOutcome::FailTo { state } => {
                    if let Err(e) = self
                        .reject_to(task, &actor, "flow condition failed", &state)
                        .await
                    {
                        tracing::warn!(task_id = %task.id, error = %e, "flow rejection failed");
                    } else {
                        moved += 1;
                    }
                }
                FlowOutcome::Advance => {
                    let mut step_ctx = StepContext {
                        task: task.clone(),
                        worktree,
                        repo_dir: self.layout.root().to_path_buf(),
                        branch: WorktreeManager::branch_name(&task.id),
                        pr_url: task.pr_url.clone(),
                        timeout: self.options.step_timeout,
                    };

                    match engine.execute_runs(transition, registry, &mut step_ctx).await? {
                        FlowOutcome::FailTo { state } => {
                            if let Err(e) =
                                self.reject_to(task, &actor, "flow step failed", &state).await
                            {
                                tracing::warn!(task_id = %task.id, error = %e, "flow rejection failed");
                            } else {
                                moved += 1;
                            }
                        }
                        _ => {
                            // Steps may have bumped the task version (e.g.
                            // recording a PR URL), so accept with a fresh
                            // snapshot.
                            match self.accept_fresh(&task.id, &actor).await {
                                Ok(()) => moved += 1,
                                Err(e) => {
                                    tracing::warn!(
                                        task_id = %task.id,
                                        error = %e,
                                        "accept failed, will retry next tick"
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(moved)
    }

    async fn accept_fresh(&self, task_id: &str, actor: &str) -> Result<(), ClientError> {
        let fresh = self.client.get_task(task_id).await?;
        self.client.accept(task_id, fresh.version, actor).await?;
        Ok(())
    }

    async fn reject_to(
        &self,
        task: &Task,
        actor: &str,
        reason: &str,
        state: &str,
    ) -> Result<(), ClientError> {
        let fresh = self.client.get_task(&task.id).await?;
        let target = (state != queue::INCOMING).then_some(state);
        self.client
            .reject(&task.id, fresh.version, actor, reason, target)
            .await?;
        Ok(())
    }

    /// Resolve a task's flow document from `.octopoid/flows/`, falling back
    /// to the installed default.
    fn load_flow(&self, task: &Task) -> FlowDocument {
        let name = task.flow.as_deref().unwrap_or("default");
        let path = self.layout.flows_dir().join(format!("{name}.yaml"));
        match FlowDocument::load(&path) {
            Ok(flow) => flow,
            Err(e) => {
                if name != "default" {
                    tracing::warn!(flow = name, error = %e, "flow not loadable, using default");
                }
                FlowDocument::default_flow()
            }
        }
    }
}
