//! The implementer strategy: one task, one worktree, one subprocess.

use anyhow::{Context, Result};

use crate::spawn::{build_env, prepare_task_dir, SpawnContext, SpawnStrategy, SpawnedInstance};
use crate::worktree::WorktreeManager;

/// Spawns an implementer in a *task-specific* worktree.
///
/// The worktree path derives from the task identifier, not the blueprint
/// name, so any number of implementers run in parallel without touching
/// each other's trees. The worktree starts on a detached HEAD at the task's
/// base branch; the named `agent/<task-id>` branch only appears when a later
/// push step publishes it, so no two worktrees ever conflict over branches.
pub struct ImplementerStrategy;

impl SpawnStrategy for ImplementerStrategy {
    fn name(&self) -> &str {
        "implementer"
    }

    fn spawn(&self, ctx: &SpawnContext<'_>) -> Result<SpawnedInstance> {
        let task = ctx
            .task
            .as_ref()
            .context("implementer strategy requires a claimed task")?;

        prepare_task_dir(ctx, task)?;

        let manager =
            WorktreeManager::new(ctx.layout.root()).map_err(|e| anyhow::anyhow!("{e}"))?;
        let start_ref = manager.resolve_start_ref(&task.branch);
        let worktree = ctx.layout.task_worktree_dir(&task.id);
        manager
            .create_detached(&worktree, &start_ref)
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let env = build_env(ctx, Some(&worktree))?;

        let pid = crate::process::spawn_detached(
            &ctx.blueprint.command,
            &worktree,
            &env,
            &ctx.layout.task_stdout_path(&task.id),
            &ctx.layout.task_stderr_path(&task.id),
        )?;

        tracing::info!(
            task_id = %task.id,
            instance = %ctx.instance,
            pid,
            worktree = %worktree.display(),
            "implementer spawned"
        );

        Ok(SpawnedInstance {
            instance: ctx.instance.clone(),
            pid,
            task_id: Some(task.id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use octopoid_db::models::{queue, Priority, Task};
    use std::process::Command;

    use crate::config::OrchestratorConfig;
    use crate::fleet::{Blueprint, BlueprintKind};
    use crate::layout::ProjectLayout;

    fn init_repo(dir: &std::path::Path) {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "t@localhost"],
            vec!["config", "user.name", "t"],
        ] {
            assert!(Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .unwrap()
                .status
                .success());
        }
        std::fs::write(dir.join("README.md"), "seed\n").unwrap();
        for args in [vec!["add", "-A"], vec!["commit", "-m", "seed"]] {
            assert!(Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .unwrap()
                .status
                .success());
        }
    }

    fn fixture_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "add the widget".to_string(),
            role: "implement".to_string(),
            priority: Priority::P1,
            queue: queue::CLAIMED.to_string(),
            branch: "main".to_string(),
            project_id: None,
            flow: None,
            blocked_by: None,
            claimed_by: Some("impl-1".to_string()),
            orchestrator: Some("dev-mbp".to_string()),
            claimed_from: Some(queue::INCOMING.to_string()),
            lease_expires_at: Some(Utc::now()),
            version: 2,
            commits_count: 0,
            turns_used: 0,
            attempt_count: 1,
            rejection_count: 0,
            paused: false,
            submitted_at: None,
            accepted_by: None,
            completed_at: None,
            failure_reason: None,
            pr_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn spawn_prepares_worktree_prompt_and_env() {
        let tmp = tempfile::TempDir::new().unwrap();
        init_repo(tmp.path());

        let layout = ProjectLayout::new(tmp.path());
        layout.ensure_runtime_dirs().unwrap();

        // Blueprint template with a prompt and a script.
        let template_dir = layout.agent_template_dir("implementer");
        std::fs::create_dir_all(template_dir.join("scripts")).unwrap();
        std::fs::write(
            template_dir.join("prompt.md"),
            "Work on {{task_id}}: {{content}}",
        )
        .unwrap();
        std::fs::write(template_dir.join("scripts").join("run-tests"), "#!/bin/sh\n").unwrap();
        std::fs::write(template_dir.join("env.sh"), "EXTRA=1\n").unwrap();

        // Authoritative task description.
        std::fs::create_dir_all(layout.tasks_dir()).unwrap();
        std::fs::write(layout.task_content_path("TASK-1"), "Build the widget.").unwrap();

        // A stale result from a previous run must be cleared.
        std::fs::create_dir_all(layout.task_runtime_dir("TASK-1")).unwrap();
        std::fs::write(
            layout.task_result_path("TASK-1"),
            r#"{"outcome": "done"}"#,
        )
        .unwrap();

        let config = OrchestratorConfig {
            server_url: "http://localhost:7420".to_string(),
            cluster: "dev".to_string(),
            machine_id: "mbp".to_string(),
            base_branch: "main".to_string(),
            fleet: "agents.yaml".to_string(),
            repo_url: String::new(),
            max_claimed: 8,
            max_open_prs: 10,
        };
        let blueprint = Blueprint {
            name: "implementer".to_string(),
            kind: BlueprintKind::Implementer,
            role: "implement".to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()],
            enabled: true,
            max_instances: 1,
            interval_seconds: 60,
            claim_queue: None,
            pre_check: None,
            agent_dir: None,
        };

        let ctx = SpawnContext {
            layout: &layout,
            config: &config,
            blueprint: &blueprint,
            instance: "implementer-test-1".to_string(),
            task: Some(fixture_task("TASK-1")),
        };

        let spawned = ImplementerStrategy.spawn(&ctx).unwrap();
        assert_eq!(spawned.task_id.as_deref(), Some("TASK-1"));
        assert!(spawned.pid > 0);

        // Worktree exists, detached, with repo contents.
        let worktree = layout.task_worktree_dir("TASK-1");
        assert!(worktree.join("README.md").is_file());

        // Prompt rendered with the task description.
        let prompt = std::fs::read_to_string(layout.task_prompt_path("TASK-1")).unwrap();
        assert_eq!(prompt, "Work on TASK-1: Build the widget.");

        // Scripts copied, metadata written, stale result gone.
        assert!(layout.task_scripts_dir("TASK-1").join("run-tests").is_file());
        assert!(layout.task_meta_path("TASK-1").is_file());
        assert!(!layout.task_result_path("TASK-1").exists());
    }

    #[test]
    fn spawn_without_task_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        init_repo(tmp.path());
        let layout = ProjectLayout::new(tmp.path());

        let config = OrchestratorConfig {
            server_url: "http://localhost:7420".to_string(),
            cluster: "dev".to_string(),
            machine_id: "mbp".to_string(),
            base_branch: "main".to_string(),
            fleet: "agents.yaml".to_string(),
            repo_url: String::new(),
            max_claimed: 8,
            max_open_prs: 10,
        };
        let blueprint = Blueprint {
            name: "implementer".to_string(),
            kind: BlueprintKind::Implementer,
            role: "implement".to_string(),
            command: vec!["true".to_string()],
            enabled: true,
            max_instances: 1,
            interval_seconds: 60,
            claim_queue: None,
            pre_check: None,
            agent_dir: None,
        };

        let ctx = SpawnContext {
            layout: &layout,
            config: &config,
            blueprint: &blueprint,
            instance: "implementer-test-2".to_string(),
            task: None,
        };

        assert!(ImplementerStrategy.spawn(&ctx).is_err());
    }
}
