//! Git worktree management for agent isolation.
//!
//! Every agent runs inside a worktree of the project repository: filesystem
//! isolation without full clones. Worktrees are created on a *detached* HEAD
//! so no branch is held while the agent works; the named `agent/<task-id>`
//! branch only comes into existence when the push step publishes it. That is
//! what lets any number of task worktrees coexist without branch conflicts.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Errors that can occur during worktree operations.
#[derive(Debug, Error)]
pub enum WorktreeError {
    /// The main repository path does not exist or is not a git repository.
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    /// A git command failed to execute.
    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A git command exited with a non-zero status.
    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Failed to parse porcelain output from `git worktree list`.
    #[error("failed to parse worktree list output: {0}")]
    ParseError(String),
}

/// Information about a single git worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Absolute path to the worktree directory.
    pub path: PathBuf,
    /// Branch checked out in this worktree; `None` for detached HEAD.
    pub branch: Option<String>,
    /// HEAD commit SHA.
    pub head_commit: String,
}

/// Manages worktrees for one project repository.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    /// Path to the main git repository.
    repo_path: PathBuf,
}

impl WorktreeManager {
    /// Create a manager for a repository.
    ///
    /// # Errors
    ///
    /// Returns [`WorktreeError::NotAGitRepo`] if `repo_path` is not a git
    /// repository.
    pub fn new(repo_path: impl Into<PathBuf>) -> Result<Self, WorktreeError> {
        let repo_path = repo_path.into();

        let output = Command::new("git")
            .arg("rev-parse")
            .arg("--git-dir")
            .current_dir(&repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(WorktreeError::NotAGitRepo(repo_path));
        }

        Ok(Self { repo_path })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Build the conventional branch name for a task.
    ///
    /// Format: `agent/<task-id>`
    pub fn branch_name(task_id: &str) -> String {
        format!("agent/{task_id}")
    }

    /// Create a worktree at `worktree_path` on a detached HEAD pointing at
    /// `start_ref`.
    ///
    /// This operation is **idempotent**: an existing registered worktree at
    /// the path is returned as-is (a re-run after a partial tick must not
    /// fail here).
    pub fn create_detached(
        &self,
        worktree_path: &Path,
        start_ref: &str,
    ) -> Result<WorktreeInfo, WorktreeError> {
        if let Ok(existing) = self.find_worktree_by_path(worktree_path) {
            tracing::info!(
                path = %worktree_path.display(),
                "worktree already exists, returning existing"
            );
            return Ok(existing);
        }

        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WorktreeError::GitCommand {
                message: format!("failed to create worktree parent {}", parent.display()),
                source: e,
            })?;
        }

        let output = Command::new("git")
            .args(["worktree", "add", "--detach"])
            .arg(worktree_path)
            .arg(start_ref)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree add --detach".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            self.cleanup_partial(worktree_path);
            return Err(WorktreeError::GitExit {
                command: "worktree add --detach".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        self.find_worktree_by_path(worktree_path)
    }

    /// Remove a worktree by its path.
    ///
    /// This removes the worktree directory and unregisters it from git.
    /// If the worktree does not exist, this is a no-op (idempotent).
    pub fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError> {
        if self.find_worktree_by_path(path).is_err() {
            // Worktree not registered. Clean up the directory if it exists.
            if path.exists() {
                tracing::warn!(
                    path = %path.display(),
                    "directory exists but not registered as worktree, removing"
                );
                let _ = std::fs::remove_dir_all(path);
            }
            return Ok(());
        }

        let output = Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(path)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree remove".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("is not a working tree") {
                return Ok(());
            }
            return Err(WorktreeError::GitExit {
                command: "worktree remove".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    /// List all worktrees associated with the main repository.
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        let output = Command::new("git")
            .args(["worktree", "list", "--porcelain"])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree list".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "worktree list".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_porcelain_output(&stdout)
    }

    /// Prune stale worktree entries.
    ///
    /// Runs `git worktree prune` to clean up references to worktrees
    /// whose directories have been removed externally.
    pub fn prune(&self) -> Result<(), WorktreeError> {
        let output = Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree prune".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "worktree prune".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    /// Publish a worktree's HEAD as `branch` on the remote. This is the
    /// moment the named branch comes into existence.
    pub fn push_branch(&self, worktree_path: &Path, branch: &str) -> Result<(), WorktreeError> {
        let output = Command::new("git")
            .args(["push", "origin"])
            .arg(format!("HEAD:refs/heads/{branch}"))
            .current_dir(worktree_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git push".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "push".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    /// Resolve a ref, preferring the local name and falling back to
    /// `origin/<ref>` (a task's base branch may only exist on the remote).
    pub fn resolve_start_ref(&self, reference: &str) -> String {
        if self.ref_exists(reference) {
            reference.to_string()
        } else {
            format!("origin/{reference}")
        }
    }

    fn ref_exists(&self, reference: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{reference}^{{commit}}"))
            .current_dir(&self.repo_path)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Find a worktree by its path in the worktree list.
    fn find_worktree_by_path(&self, path: &Path) -> Result<WorktreeInfo, WorktreeError> {
        let worktrees = self.list_worktrees()?;
        // Canonicalize for comparison where possible.
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        for wt in worktrees {
            let wt_canonical = wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone());
            if wt_canonical == canonical {
                return Ok(wt);
            }
        }

        Err(WorktreeError::ParseError(format!(
            "worktree not found at path: {}",
            path.display()
        )))
    }

    /// Best-effort cleanup of a partially created worktree directory.
    fn cleanup_partial(&self, path: &Path) {
        if path.exists() {
            tracing::warn!(
                path = %path.display(),
                "cleaning up partial worktree directory"
            );
            let _ = std::fs::remove_dir_all(path);
        }
        let _ = self.prune();
    }
}

/// Parse the porcelain output of `git worktree list --porcelain`.
///
/// The format consists of blocks separated by blank lines. Each block has:
///
/// ```text
/// worktree <path>
/// HEAD <sha>
/// branch refs/heads/<name>
/// ```
///
/// The main worktree may show `bare` instead of `branch`, and detached
/// worktrees show `detached` instead of `branch`.
fn parse_porcelain_output(output: &str) -> Result<Vec<WorktreeInfo>, WorktreeError> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let (Some(path), Some(head)) = (current_path.take(), current_head.take()) {
                worktrees.push(WorktreeInfo {
                    path,
                    branch: current_branch.take(),
                    head_commit: head,
                });
            } else {
                current_path = None;
                current_head = None;
                current_branch = None;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            let branch = rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string();
            current_branch = Some(branch);
        }
        // Ignore `bare`, `detached`, `prunable`, etc.
    }

    // Handle the last block (porcelain output may not end with a blank line).
    if let (Some(path), Some(head)) = (current_path, current_head) {
        worktrees.push(WorktreeInfo {
            path,
            branch: current_branch,
            head_commit: head,
        });
    }

    Ok(worktrees)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "test@localhost"],
            vec!["config", "user.name", "test"],
        ] {
            let status = Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .expect("git should run");
            assert!(status.status.success(), "git {args:?} failed");
        }
        std::fs::write(dir.join("README.md"), "seed\n").unwrap();
        for args in [vec!["add", "-A"], vec!["commit", "-m", "seed"]] {
            let status = Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .expect("git should run");
            assert!(status.status.success(), "git {args:?} failed");
        }
    }

    #[test]
    fn new_rejects_non_repo() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = WorktreeManager::new(tmp.path());
        assert!(matches!(result, Err(WorktreeError::NotAGitRepo(_))));
    }

    #[test]
    fn branch_name_format() {
        assert_eq!(WorktreeManager::branch_name("TASK-1"), "agent/TASK-1");
    }

    #[test]
    fn create_detached_is_idempotent_and_holds_no_branch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_repo(&repo);

        let manager = WorktreeManager::new(&repo).unwrap();
        let wt_path = tmp.path().join("wt").join("TASK-1");

        let info = manager.create_detached(&wt_path, "main").unwrap();
        assert!(info.branch.is_none(), "worktree must be detached");
        assert!(wt_path.join("README.md").is_file());

        // Second creation returns the existing worktree.
        let again = manager.create_detached(&wt_path, "main").unwrap();
        assert_eq!(again.path.file_name(), info.path.file_name());

        // A second detached worktree from the same ref coexists happily.
        let wt2 = tmp.path().join("wt").join("TASK-2");
        manager.create_detached(&wt2, "main").unwrap();

        manager.remove_worktree(&wt_path).unwrap();
        assert!(!wt_path.exists());
        // Removing again is a no-op.
        manager.remove_worktree(&wt_path).unwrap();
    }

    #[test]
    fn resolve_start_ref_falls_back_to_origin() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_repo(&repo);

        let manager = WorktreeManager::new(&repo).unwrap();
        assert_eq!(manager.resolve_start_ref("main"), "main");
        assert_eq!(manager.resolve_start_ref("ghost"), "origin/ghost");
    }

    #[test]
    fn parse_porcelain_blocks() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\n\
                      worktree /wt/TASK-1\nHEAD def456\ndetached\n";
        let worktrees = parse_porcelain_output(output).unwrap();
        assert_eq!(worktrees.len(), 2);
        assert_eq!(worktrees[0].branch.as_deref(), Some("main"));
        assert_eq!(worktrees[1].branch, None);
        assert_eq!(worktrees[1].head_commit, "def456");
    }
}
