//! The orchestrator scheduler: one externally-driven tick.
//!
//! A tick runs three phases under the global scheduler lock:
//! - **A. Housekeeping**: register/heartbeat, collect finished results,
//!   observe lease expiries, process provisional tasks through their flows.
//! - **B. Evaluate**: each blueprint, in declaration order, through the
//!   guard chain.
//! - **C. Spawn**: the strategy selected by blueprint type; a claim that
//!   cannot be followed by a successful spawn is compensated with a requeue
//!   so no task is lost to orchestrator-side errors.
//!
//! The tick never fails as a whole: job and blueprint failures are recorded
//! and reported, not propagated.

pub mod guards;
pub mod housekeeping;
pub mod state;

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use octopoid_db::models::SchedulerSnapshot;

use crate::client::ApiClient;
use crate::config::OrchestratorConfig;
use crate::fleet::{Blueprint, FleetConfig};
use crate::flow::steps::{builtin_registry, StepRegistry};
use crate::layout::ProjectLayout;
use crate::lockfile::LockFile;
use crate::pool_tracker::{instance_name, PoolEntry, PoolTracker};
use crate::scheduler::guards::{run_guard_chain, GuardContext, GuardVerdict};
use crate::scheduler::housekeeping::Housekeeping;
use crate::scheduler::state::{update_state, BlueprintState};
use crate::spawn::{strategy_for, SpawnContext};

/// Tunable tick behaviour.
#[derive(Debug, Clone)]
pub struct TickOptions {
    /// Budget for flow condition scripts.
    pub script_timeout: Duration,
    /// Budget per flow step (pushes, PR creation, test runs).
    pub step_timeout: Duration,
    /// Budget for blueprint pre-check commands.
    pub pre_check_timeout: Duration,
    /// Grace before a dead, resultless instance is swept as a zombie.
    pub zombie_grace: chrono::Duration,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self {
            script_timeout: Duration::from_secs(120),
            step_timeout: Duration::from_secs(600),
            pre_check_timeout: Duration::from_secs(60),
            zombie_grace: chrono::Duration::seconds(300),
        }
    }
}

/// What happened to one housekeeping job.
#[derive(Debug)]
pub struct JobReport {
    pub job: &'static str,
    pub error: Option<String>,
}

/// What happened to one blueprint this tick.
#[derive(Debug)]
pub enum BlueprintOutcome {
    Spawned { instance: String, task_id: Option<String> },
    Blocked { guard: &'static str, reason: String },
    LockHeld,
    Failed { error: String },
}

/// Report from a completed tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub jobs: Vec<JobReport>,
    pub blueprints: Vec<(String, BlueprintOutcome)>,
}

/// Result of a tick invocation.
#[derive(Debug)]
pub enum TickOutcome {
    /// The tick ran; details in the report.
    Completed(TickReport),
    /// Another tick holds the scheduler lock; nothing was modified.
    LockHeld,
}

/// The per-tick orchestrator. Collaborators are built once and passed
/// explicitly; nothing global.
pub struct Scheduler {
    layout: ProjectLayout,
    config: OrchestratorConfig,
    fleet: FleetConfig,
    client: ApiClient,
    registry: StepRegistry,
    options: TickOptions,
}

impl Scheduler {
    pub fn new(
        layout: ProjectLayout,
        config: OrchestratorConfig,
        fleet: FleetConfig,
        options: TickOptions,
    ) -> Self {
        let client = ApiClient::new(config.server_url.clone());
        let registry = builtin_registry(client.clone());
        Self {
            layout,
            config,
            fleet,
            client,
            registry,
            options,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Run one tick. Returns immediately when another tick holds the lock.
    pub async fn run_tick(&self) -> Result<TickOutcome> {
        let Some(_tick_lock) = LockFile::try_acquire(&self.layout.scheduler_lock_path())? else {
            tracing::info!("scheduler lock held, skipping tick");
            return Ok(TickOutcome::LockHeld);
        };

        self.layout.ensure_runtime_dirs()?;
        let mut report = TickReport::default();

        // ---------------- Phase A: housekeeping ----------------
        let housekeeping = Housekeeping {
            client: &self.client,
            layout: &self.layout,
            config: &self.config,
            fleet: &self.fleet,
            options: &self.options,
        };

        report.jobs.push(job_report(
            "register_heartbeat",
            housekeeping.register_and_heartbeat().await,
        ));

        // Dead pids are reaped before new spawns so a blueprint can free its
        // own capacity within the tick.
        report.jobs.push(job_report(
            "collect_results",
            housekeeping.collect_results().await.map(|_| ()),
        ));

        report.jobs.push(job_report(
            "observe_leases",
            housekeeping.observe_leases().await.map(|_| ()),
        ));

        // The single pre-fetched snapshot used by flow work and every
        // backpressure guard this tick.
        let snapshot = match self.client.poll(&self.config.orchestrator_id()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Without a snapshot neither flow work nor spawning can make
                // sound decisions; end the tick gracefully.
                tracing::error!(error = %e, "scheduler poll failed, ending tick");
                report.jobs.push(JobReport {
                    job: "poll",
                    error: Some(format!("{e:#}")),
                });
                return Ok(TickOutcome::Completed(report));
            }
        };

        report.jobs.push(job_report(
            "process_provisional",
            housekeeping
                .process_provisional(&snapshot, &self.registry)
                .await
                .map(|_| ()),
        ));

        // ---------------- Phases B + C: evaluate and spawn ----------------
        for blueprint in &self.fleet.blueprints {
            let outcome = self.evaluate_blueprint(blueprint, &snapshot).await;
            report.blueprints.push((blueprint.name.clone(), outcome));
        }

        Ok(TickOutcome::Completed(report))
    }

    /// Phase B for one blueprint: lock, guard chain, then (Phase C) spawn.
    async fn evaluate_blueprint(
        &self,
        blueprint: &Blueprint,
        snapshot: &SchedulerSnapshot,
    ) -> BlueprintOutcome {
        let state_path = self.layout.blueprint_state_path(&blueprint.name);

        let lock = match LockFile::try_acquire(&self.layout.blueprint_lock_path(&blueprint.name)) {
            Ok(Some(lock)) => lock,
            Ok(None) => return BlueprintOutcome::LockHeld,
            Err(e) => {
                return BlueprintOutcome::Failed {
                    error: format!("blueprint lock: {e:#}"),
                };
            }
        };
        let _lock = lock;

        match self.guarded_spawn(blueprint, snapshot).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("{e:#}");
                let _ = update_state(&state_path, |s| s.record_error(&message));
                tracing::error!(
                    blueprint = %blueprint.name,
                    error = %message,
                    "blueprint evaluation failed"
                );
                BlueprintOutcome::Failed { error: message }
            }
        }
    }

    async fn guarded_spawn(
        &self,
        blueprint: &Blueprint,
        snapshot: &SchedulerSnapshot,
    ) -> Result<BlueprintOutcome> {
        let state_path = self.layout.blueprint_state_path(&blueprint.name);
        let state = BlueprintState::load(&state_path);

        let tracker = PoolTracker::load(&self.layout.blueprint_pids_path(&blueprint.name))?;
        let instance = instance_name(&blueprint.name);

        let ctx = GuardContext {
            blueprint,
            config: &self.config,
            state: &state,
            snapshot,
            live_instances: tracker.len(),
            instance: &instance,
            project_root: self.layout.root(),
            now: Utc::now(),
            pre_check_timeout: self.options.pre_check_timeout,
        };

        let claimed = match run_guard_chain(&ctx, &self.client).await? {
            GuardVerdict::Block { guard, reason } => {
                update_state(&state_path, |s| s.record_block(guard, &reason))?;
                tracing::debug!(
                    blueprint = %blueprint.name,
                    guard,
                    reason = %reason,
                    "guard chain blocked"
                );
                return Ok(BlueprintOutcome::Blocked { guard, reason });
            }
            GuardVerdict::Pass { claimed } => claimed,
        };

        // Phase C. From here on a claimed task must never be lost: any spawn
        // failure compensates by returning it to its re-entry queue.
        let spawn_ctx = SpawnContext {
            layout: &self.layout,
            config: &self.config,
            blueprint,
            instance: instance.clone(),
            task: claimed.clone(),
        };

        let strategy = strategy_for(blueprint.kind);
        let spawned = match strategy.spawn(&spawn_ctx) {
            Ok(spawned) => spawned,
            Err(spawn_err) => {
                if let Some(ref task) = claimed {
                    match self
                        .client
                        .requeue(
                            &task.id,
                            task.version,
                            &instance,
                            &format!("spawn failed: {spawn_err:#}"),
                        )
                        .await
                    {
                        Ok(_) => {
                            tracing::warn!(
                                task_id = %task.id,
                                blueprint = %blueprint.name,
                                "spawn failed, task requeued"
                            );
                        }
                        Err(requeue_err) => {
                            // The lease will expire on its own; nothing is
                            // lost, just delayed.
                            tracing::error!(
                                task_id = %task.id,
                                error = %requeue_err,
                                "compensating requeue failed; lease expiry will recover the task"
                            );
                        }
                    }
                }
                return Err(spawn_err.context(format!(
                    "spawn failed for blueprint {}",
                    blueprint.name
                )));
            }
        };

        let mut tracker = PoolTracker::load(&self.layout.blueprint_pids_path(&blueprint.name))?;
        tracker.insert(
            &spawned.instance,
            PoolEntry {
                pid: spawned.pid,
                task_id: spawned.task_id.clone(),
                started_at: Utc::now(),
            },
        )?;

        update_state(&state_path, |s| s.record_spawn(Utc::now()))?;

        Ok(BlueprintOutcome::Spawned {
            instance: spawned.instance,
            task_id: spawned.task_id,
        })
    }
}

fn job_report(job: &'static str, result: Result<()>) -> JobReport {
    match result {
        Ok(()) => JobReport { job, error: None },
        Err(e) => {
            tracing::error!(job, error = %format!("{e:#}"), "housekeeping job failed");
            JobReport {
                job,
                error: Some(format!("{e:#}")),
            }
        }
    }
}
