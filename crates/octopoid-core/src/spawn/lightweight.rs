//! The lightweight strategy: monitors and pollers that need no isolation.

use anyhow::{Context, Result};

use crate::spawn::{build_env, SpawnContext, SpawnStrategy, SpawnedInstance};

/// Spawns an agent directly in the parent repository directory. No worktree,
/// no task claim: lightweight blueprints watch the world (issue ingestion,
/// notifications) rather than working a task.
pub struct LightweightStrategy;

impl SpawnStrategy for LightweightStrategy {
    fn name(&self) -> &str {
        "lightweight"
    }

    fn spawn(&self, ctx: &SpawnContext<'_>) -> Result<SpawnedInstance> {
        let run_dir = ctx.layout.blueprint_runtime_dir(&ctx.blueprint.name);
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create {}", run_dir.display()))?;

        let env = build_env(ctx, None)?;

        let pid = crate::process::spawn_detached(
            &ctx.blueprint.command,
            ctx.layout.root(),
            &env,
            &run_dir.join("stdout.log"),
            &run_dir.join("stderr.log"),
        )?;

        tracing::info!(
            instance = %ctx.instance,
            pid,
            "lightweight agent spawned"
        );

        Ok(SpawnedInstance {
            instance: ctx.instance.clone(),
            pid,
            task_id: None,
        })
    }
}
