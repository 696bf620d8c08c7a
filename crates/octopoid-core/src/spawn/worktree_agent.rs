//! The worktree strategy: gatekeepers and reviewers that share one worktree
//! per blueprint.

use anyhow::{Context, Result};

use crate::spawn::{build_env, prepare_task_dir, SpawnContext, SpawnStrategy, SpawnedInstance};
use crate::worktree::WorktreeManager;

/// Spawns an agent in a *blueprint-named* worktree shared across that
/// blueprint's tasks. These blueprints work one task at a time
/// (`max_instances: 1`), so the shared tree is safe, and re-pointing it at
/// the claimed task's branch pre-positions it for the work.
pub struct WorktreeStrategy;

impl SpawnStrategy for WorktreeStrategy {
    fn name(&self) -> &str {
        "worktree"
    }

    fn spawn(&self, ctx: &SpawnContext<'_>) -> Result<SpawnedInstance> {
        let manager =
            WorktreeManager::new(ctx.layout.root()).map_err(|e| anyhow::anyhow!("{e}"))?;

        // Peek at the claimed task's branch to position the worktree; fall
        // back to the configured base branch between tasks.
        let reference = ctx
            .task
            .as_ref()
            .map(|t| t.branch.clone())
            .unwrap_or_else(|| ctx.config.base_branch.clone());
        let start_ref = manager.resolve_start_ref(&reference);

        let worktree = ctx.layout.blueprint_worktree_dir(&ctx.blueprint.name);
        manager
            .create_detached(&worktree, &start_ref)
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let (task_id, stdout, stderr) = match ctx.task.as_ref() {
            Some(task) => {
                prepare_task_dir(ctx, task)?;
                (
                    Some(task.id.clone()),
                    ctx.layout.task_stdout_path(&task.id),
                    ctx.layout.task_stderr_path(&task.id),
                )
            }
            None => {
                let run_dir = ctx.layout.blueprint_runtime_dir(&ctx.blueprint.name);
                std::fs::create_dir_all(&run_dir)
                    .with_context(|| format!("failed to create {}", run_dir.display()))?;
                (None, run_dir.join("stdout.log"), run_dir.join("stderr.log"))
            }
        };

        let env = build_env(ctx, Some(&worktree))?;

        let pid = crate::process::spawn_detached(
            &ctx.blueprint.command,
            &worktree,
            &env,
            &stdout,
            &stderr,
        )?;

        tracing::info!(
            instance = %ctx.instance,
            pid,
            task_id = task_id.as_deref().unwrap_or("-"),
            worktree = %worktree.display(),
            "worktree agent spawned"
        );

        Ok(SpawnedInstance {
            instance: ctx.instance.clone(),
            pid,
            task_id,
        })
    }
}
