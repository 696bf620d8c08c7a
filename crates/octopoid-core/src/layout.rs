//! On-disk layout of an orchestrator installation.
//!
//! ```text
//! <project>/.octopoid/
//!   config.yaml
//!   agents.yaml
//!   agents/<type>/          blueprint templates (agent.yaml, prompt.md, scripts/)
//!   flows/*.yaml
//!   tasks/TASK-*.md         authoritative task descriptions
//!   runtime/
//!     orchestrator_id.txt
//!     scheduler.lock
//!     agents/<blueprint>/{running_pids.json, state.json, blueprint.lock, worktree/}
//!     tasks/<task_id>/{worktree/, task.json, prompt.md, scripts/, result.json, *.log}
//!   logs/
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Path helper for everything under `<project>/.octopoid/`.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    /// The project repository root (the parent of `.octopoid/`).
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dot_dir(&self) -> PathBuf {
        self.root.join(".octopoid")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dot_dir().join("config.yaml")
    }

    pub fn fleet_path(&self, fleet_file: &str) -> PathBuf {
        self.dot_dir().join(fleet_file)
    }

    pub fn flows_dir(&self) -> PathBuf {
        self.dot_dir().join("flows")
    }

    /// Directory of authoritative task description files (`TASK-*.md`).
    pub fn tasks_dir(&self) -> PathBuf {
        self.dot_dir().join("tasks")
    }

    pub fn task_content_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{task_id}.md"))
    }

    /// Blueprint template directory (`agents/<type>/`).
    pub fn agent_template_dir(&self, agent_dir: &str) -> PathBuf {
        self.dot_dir().join("agents").join(agent_dir)
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.dot_dir().join("runtime")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dot_dir().join("logs")
    }

    pub fn orchestrator_id_path(&self) -> PathBuf {
        self.runtime_dir().join("orchestrator_id.txt")
    }

    /// The global tick lock.
    pub fn scheduler_lock_path(&self) -> PathBuf {
        self.runtime_dir().join("scheduler.lock")
    }

    // -------------------------------------------------------------------
    // Per-blueprint runtime
    // -------------------------------------------------------------------

    pub fn blueprint_runtime_dir(&self, blueprint: &str) -> PathBuf {
        self.runtime_dir().join("agents").join(blueprint)
    }

    pub fn blueprint_pids_path(&self, blueprint: &str) -> PathBuf {
        self.blueprint_runtime_dir(blueprint).join("running_pids.json")
    }

    pub fn blueprint_state_path(&self, blueprint: &str) -> PathBuf {
        self.blueprint_runtime_dir(blueprint).join("state.json")
    }

    pub fn blueprint_lock_path(&self, blueprint: &str) -> PathBuf {
        self.blueprint_runtime_dir(blueprint).join("blueprint.lock")
    }

    /// Shared worktree for worktree-mode blueprints.
    pub fn blueprint_worktree_dir(&self, blueprint: &str) -> PathBuf {
        self.blueprint_runtime_dir(blueprint).join("worktree")
    }

    // -------------------------------------------------------------------
    // Per-task runtime
    // -------------------------------------------------------------------

    pub fn task_runtime_dir(&self, task_id: &str) -> PathBuf {
        self.runtime_dir().join("tasks").join(task_id)
    }

    /// Task-specific worktree (implementer strategy).
    pub fn task_worktree_dir(&self, task_id: &str) -> PathBuf {
        self.task_runtime_dir(task_id).join("worktree")
    }

    pub fn task_meta_path(&self, task_id: &str) -> PathBuf {
        self.task_runtime_dir(task_id).join("task.json")
    }

    pub fn task_prompt_path(&self, task_id: &str) -> PathBuf {
        self.task_runtime_dir(task_id).join("prompt.md")
    }

    pub fn task_scripts_dir(&self, task_id: &str) -> PathBuf {
        self.task_runtime_dir(task_id).join("scripts")
    }

    /// The well-known path where the agent drops its result artifact.
    pub fn task_result_path(&self, task_id: &str) -> PathBuf {
        self.task_runtime_dir(task_id).join("result.json")
    }

    pub fn task_stdout_path(&self, task_id: &str) -> PathBuf {
        self.task_runtime_dir(task_id).join("stdout.log")
    }

    pub fn task_stderr_path(&self, task_id: &str) -> PathBuf {
        self.task_runtime_dir(task_id).join("stderr.log")
    }

    /// Create the runtime directory tree if absent.
    pub fn ensure_runtime_dirs(&self) -> Result<()> {
        for dir in [
            self.runtime_dir(),
            self.runtime_dir().join("agents"),
            self.runtime_dir().join("tasks"),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted_under_dot_octopoid() {
        let layout = ProjectLayout::new("/work/repo");
        assert_eq!(
            layout.scheduler_lock_path(),
            PathBuf::from("/work/repo/.octopoid/runtime/scheduler.lock")
        );
        assert_eq!(
            layout.task_result_path("TASK-1"),
            PathBuf::from("/work/repo/.octopoid/runtime/tasks/TASK-1/result.json")
        );
        assert_eq!(
            layout.blueprint_pids_path("implementer"),
            PathBuf::from("/work/repo/.octopoid/runtime/agents/implementer/running_pids.json")
        );
        assert_eq!(
            layout.task_content_path("TASK-1"),
            PathBuf::from("/work/repo/.octopoid/tasks/TASK-1.md")
        );
    }

    #[test]
    fn ensure_runtime_dirs_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path());
        layout.ensure_runtime_dirs().unwrap();
        layout.ensure_runtime_dirs().unwrap();
        assert!(layout.runtime_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
    }
}
