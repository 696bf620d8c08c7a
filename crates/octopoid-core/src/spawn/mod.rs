//! Spawn strategies: prepare the filesystem and environment for one agent
//! instance and launch it as a detached subprocess.
//!
//! Three strategies, selected by blueprint type:
//! - [`implementer`]: task-specific worktree, direct subprocess.
//! - [`lightweight`]: no worktree, runs in the parent repository.
//! - [`worktree_agent`]: blueprint-named worktree shared across tasks.

pub mod implementer;
pub mod lightweight;
pub mod worktree_agent;

use std::path::Path;

use anyhow::{Context, Result};

use octopoid_db::models::Task;

use crate::config::OrchestratorConfig;
use crate::fleet::{Blueprint, BlueprintKind};
use crate::layout::ProjectLayout;
use crate::prompt;
use crate::result::clear_stale_result;

/// Everything a strategy needs for one spawn.
pub struct SpawnContext<'a> {
    pub layout: &'a ProjectLayout,
    pub config: &'a OrchestratorConfig,
    pub blueprint: &'a Blueprint,
    /// Unique instance name (pool tracker key and `AGENT_NAME`).
    pub instance: String,
    /// The claimed task; `None` for lightweight blueprints.
    pub task: Option<Task>,
}

/// A launched instance, as recorded in the pool tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedInstance {
    pub instance: String,
    pub pid: u32,
    pub task_id: Option<String>,
}

/// A spawn strategy. Implementations prepare the runtime directory, render
/// the prompt, and fire-and-forget the agent process.
pub trait SpawnStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn spawn(&self, ctx: &SpawnContext<'_>) -> Result<SpawnedInstance>;
}

/// Select the strategy for a blueprint type.
pub fn strategy_for(kind: BlueprintKind) -> Box<dyn SpawnStrategy> {
    match kind {
        BlueprintKind::Implementer => Box::new(implementer::ImplementerStrategy),
        BlueprintKind::Lightweight => Box::new(lightweight::LightweightStrategy),
        BlueprintKind::Worktree => Box::new(worktree_agent::WorktreeStrategy),
    }
}

/// The environment block handed to every agent subprocess, plus whatever the
/// blueprint's `env.sh` injects.
pub(crate) fn build_env(
    ctx: &SpawnContext<'_>,
    worktree: Option<&Path>,
) -> Result<Vec<(String, String)>> {
    let mut env = vec![
        (
            "TASK_ID".to_string(),
            ctx.task.as_ref().map(|t| t.id.clone()).unwrap_or_default(),
        ),
        ("AGENT_NAME".to_string(), ctx.instance.clone()),
        ("AGENT_ROLE".to_string(), ctx.blueprint.role.clone()),
        (
            "ORCHESTRATOR_ID".to_string(),
            ctx.config.orchestrator_id(),
        ),
        ("SERVER_URL".to_string(), ctx.config.server_url.clone()),
    ];

    if let Some(worktree) = worktree {
        env.push((
            "WORKTREE".to_string(),
            worktree.to_string_lossy().into_owned(),
        ));
    }

    let env_sh = ctx
        .layout
        .agent_template_dir(ctx.blueprint.agent_dir())
        .join("env.sh");
    env.extend(prompt::parse_env_file(&env_sh)?);

    Ok(env)
}

/// Prepare the per-task runtime directory: task metadata, rendered prompt,
/// copied scripts, and a clean result path.
///
/// Deleting any pre-existing result artifact here is what keeps a crash
/// between runs from surfacing a stale success report.
pub(crate) fn prepare_task_dir(ctx: &SpawnContext<'_>, task: &Task) -> Result<()> {
    let task_dir = ctx.layout.task_runtime_dir(&task.id);
    std::fs::create_dir_all(&task_dir)
        .with_context(|| format!("failed to create {}", task_dir.display()))?;

    let stale = clear_stale_result(&ctx.layout.task_result_path(&task.id))?;
    if stale {
        tracing::warn!(task_id = %task.id, "removed stale result artifact from a previous run");
    }

    let meta = serde_json::to_string_pretty(task).context("failed to serialize task metadata")?;
    std::fs::write(ctx.layout.task_meta_path(&task.id), meta)
        .context("failed to write task.json")?;

    let template_dir = ctx.layout.agent_template_dir(ctx.blueprint.agent_dir());

    let template = std::fs::read_to_string(template_dir.join("prompt.md"))
        .unwrap_or_else(|_| DEFAULT_PROMPT_TEMPLATE.to_string());
    let instructions =
        std::fs::read_to_string(template_dir.join("instructions.md")).unwrap_or_default();

    // The authoritative task description lives in `.octopoid/tasks/`; the
    // title stands in when no description file exists.
    let content = std::fs::read_to_string(ctx.layout.task_content_path(&task.id))
        .unwrap_or_else(|_| task.title.clone());

    let rendered = prompt::render_template(
        &template,
        &[
            ("task_id", task.id.as_str()),
            ("title", task.title.as_str()),
            ("content", content.as_str()),
            ("instructions", instructions.as_str()),
        ],
    );
    std::fs::write(ctx.layout.task_prompt_path(&task.id), rendered)
        .context("failed to write prompt.md")?;

    prompt::copy_scripts(
        &template_dir.join("scripts"),
        &ctx.layout.task_scripts_dir(&task.id),
    )?;

    // Keep a copy of the blueprint's env.sh next to the other run inputs so
    // the exact environment of a run stays inspectable afterwards.
    let env_sh = template_dir.join("env.sh");
    if env_sh.is_file() {
        std::fs::copy(&env_sh, task_dir.join("env.sh"))
            .context("failed to copy env.sh into task dir")?;
    }

    Ok(())
}

const DEFAULT_PROMPT_TEMPLATE: &str = "\
# Task {{task_id}}: {{title}}

{{content}}

{{instructions}}

When you are finished, write your result to the well-known result path in
this task's runtime directory.
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_selection_matches_blueprint_kind() {
        assert_eq!(
            strategy_for(BlueprintKind::Implementer).name(),
            "implementer"
        );
        assert_eq!(
            strategy_for(BlueprintKind::Lightweight).name(),
            "lightweight"
        );
        assert_eq!(strategy_for(BlueprintKind::Worktree).name(), "worktree");
    }
}
