//! The guard chain: the fixed, ordered list of predicates a blueprint must
//! pass before an agent is spawned.
//!
//! Order matters and the chain short-circuits: `enabled`, `pool_capacity`,
//! and `interval` are free; `backpressure` reads the pre-fetched snapshot;
//! `pre_check` runs an external command; `claim_task` is the only guard
//! with a side effect (the atomic claim), so it runs last.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use octopoid_db::models::{SchedulerSnapshot, Task};

use crate::client::{ApiClient, ClaimParams};
use crate::config::OrchestratorConfig;
use crate::fleet::Blueprint;
use crate::scheduler::state::BlueprintState;

/// Inputs to one blueprint evaluation.
pub struct GuardContext<'a> {
    pub blueprint: &'a Blueprint,
    pub config: &'a OrchestratorConfig,
    pub state: &'a BlueprintState,
    pub snapshot: &'a SchedulerSnapshot,
    /// Live instance count from the pool tracker.
    pub live_instances: usize,
    /// Instance name the claim (and any spawn) will run under.
    pub instance: &'a str,
    /// Working directory for pre-check commands.
    pub project_root: &'a Path,
    pub now: DateTime<Utc>,
    pub pre_check_timeout: Duration,
}

/// Result of running the chain.
#[derive(Debug)]
pub enum GuardVerdict {
    /// All guards passed. Carries the claimed task for claimable blueprints.
    Pass { claimed: Option<Task> },
    /// A guard blocked; the blueprint is skipped this tick.
    Block { guard: &'static str, reason: String },
}

/// Run the full guard chain for a blueprint.
pub async fn run_guard_chain(
    ctx: &GuardContext<'_>,
    client: &ApiClient,
) -> Result<GuardVerdict> {
    // 1. enabled
    if !ctx.blueprint.enabled {
        return Ok(block("enabled", "blueprint is disabled"));
    }

    // 2. pool_capacity
    if ctx.live_instances >= ctx.blueprint.max_instances {
        return Ok(block(
            "pool_capacity",
            format!(
                "{} live instances >= max_instances {}",
                ctx.live_instances, ctx.blueprint.max_instances
            ),
        ));
    }

    // 3. interval
    if let Some(last_spawn_at) = ctx.state.last_spawn_at {
        let elapsed = (ctx.now - last_spawn_at).num_seconds();
        if elapsed < ctx.blueprint.interval_seconds as i64 {
            return Ok(block(
                "interval",
                format!(
                    "spawned {elapsed}s ago, interval is {}s",
                    ctx.blueprint.interval_seconds
                ),
            ));
        }
    }

    // 4. backpressure -- claimable blueprints only.
    if ctx.blueprint.claims_tasks() {
        let claimable = ctx
            .snapshot
            .count_for(ctx.blueprint.claim_queue(), &ctx.blueprint.role);
        if claimable == 0 {
            return Ok(block(
                "backpressure",
                format!(
                    "no claimable work in {:?} for role {:?}",
                    ctx.blueprint.claim_queue(),
                    ctx.blueprint.role
                ),
            ));
        }
        if ctx.snapshot.claimed_total >= ctx.config.max_claimed {
            return Ok(block(
                "backpressure",
                format!(
                    "{} tasks claimed system-wide >= max_claimed {}",
                    ctx.snapshot.claimed_total, ctx.config.max_claimed
                ),
            ));
        }
        if ctx.snapshot.open_prs >= ctx.config.max_open_prs {
            return Ok(block(
                "backpressure",
                format!(
                    "{} open PRs >= max_open_prs {}",
                    ctx.snapshot.open_prs, ctx.config.max_open_prs
                ),
            ));
        }
    }

    // 5. pre_check
    if let Some(ref command) = ctx.blueprint.pre_check {
        if let Some(reason) = run_pre_check(command, ctx).await {
            return Ok(block("pre_check", reason));
        }
    }

    // 6. claim_task -- claimable blueprints only.
    if !ctx.blueprint.claims_tasks() {
        return Ok(GuardVerdict::Pass { claimed: None });
    }

    let claimed = client
        .claim(&ClaimParams {
            orchestrator: &ctx.config.orchestrator_id(),
            agent: ctx.instance,
            role_filter: Some(&ctx.blueprint.role),
            queue: Some(ctx.blueprint.claim_queue()),
            lease_seconds: None,
        })
        .await?;

    match claimed {
        None => Ok(block(
            "claim_task",
            "claim returned no task (raced or filtered out)",
        )),
        Some(task) => Ok(GuardVerdict::Pass {
            claimed: Some(task),
        }),
    }
}

fn block(guard: &'static str, reason: impl Into<String>) -> GuardVerdict {
    GuardVerdict::Block {
        guard,
        reason: reason.into(),
    }
}

/// Run the blueprint's pre-check command. `None` means the check passed;
/// `Some(reason)` blocks. A timeout is a guard failure, not a crash.
async fn run_pre_check(command: &str, ctx: &GuardContext<'_>) -> Option<String> {
    let future = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(ctx.project_root)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(ctx.pre_check_timeout, future).await {
        Err(_) => Some(format!("pre_check {command:?} timed out")),
        Ok(Err(e)) => Some(format!("pre_check {command:?} failed to start: {e}")),
        Ok(Ok(output)) if output.status.success() => None,
        Ok(Ok(output)) => Some(format!(
            "pre_check {command:?} exited {}",
            output.status.code().unwrap_or(-1)
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
