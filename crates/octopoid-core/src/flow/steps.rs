//! The step registry: named handlers invoked by flow transitions.
//!
//! The flow engine knows nothing about a step's semantics; it resolves the
//! name and runs the handler. Adding a step is purely additive.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use octopoid_db::models::{queue, Task};

use crate::client::ApiClient;
use crate::worktree::WorktreeManager;

/// Context handed to every step of a transition. Steps may update `branch`
/// and `pr_url` for the steps after them.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub task: Task,
    /// The task's worktree, when one exists.
    pub worktree: Option<PathBuf>,
    /// The project repository root.
    pub repo_dir: PathBuf,
    /// Branch the task's work is published under.
    pub branch: String,
    pub pr_url: Option<String>,
    /// Wall-clock budget per external command.
    pub timeout: Duration,
}

impl StepContext {
    /// The directory external commands run in: the worktree when present,
    /// the repository root otherwise.
    pub fn working_dir(&self) -> &PathBuf {
        self.worktree.as_ref().unwrap_or(&self.repo_dir)
    }
}

/// A named transition step.
#[async_trait]
pub trait Step: Send + Sync {
    /// The name flows use in their `runs` lists.
    fn name(&self) -> &str;

    /// Queue the task routes to when this step fails.
    fn on_fail(&self) -> &str {
        queue::FAILED
    }

    /// Execute the step. `Ok` carries metadata to record on the task's
    /// history; `Err` aborts the transition.
    async fn run(&self, ctx: &mut StepContext) -> Result<serde_json::Value>;
}

/// A collection of registered [`Step`] handlers, keyed by name.
#[derive(Default)]
pub struct StepRegistry {
    steps: HashMap<String, Box<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. A step with the same name is replaced and returned.
    pub fn register(&mut self, step: impl Step + 'static) -> Option<Box<dyn Step>> {
        let name = step.name().to_string();
        self.steps.insert(name, Box::new(step))
    }

    pub fn get(&self, name: &str) -> Option<&dyn Step> {
        self.steps.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.steps.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry with every built-in step.
pub fn builtin_registry(client: ApiClient) -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register(PushBranch);
    registry.register(RunTests);
    registry.register(CreatePr {
        client: client.clone(),
    });
    registry.register(MergePr);
    registry.register(PostReviewComment { client });
    registry
}

// ---------------------------------------------------------------------------
// Command helper
// ---------------------------------------------------------------------------

/// Run an external command with a wall-clock budget. Exceeding the budget is
/// an ordinary failure, not a crash.
async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &std::path::Path,
    timeout: Duration,
) -> Result<std::process::Output> {
    let future = tokio::process::Command::new(program)
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| anyhow::anyhow!("{program} timed out after {timeout:?}"))?
        .with_context(|| format!("failed to run {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "{program} {args:?} failed (exit {}): {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    Ok(output)
}

// ---------------------------------------------------------------------------
// Built-in steps
// ---------------------------------------------------------------------------

/// Publish the worktree's HEAD as the task branch. This is where the named
/// branch first comes into existence.
struct PushBranch;

#[async_trait]
impl Step for PushBranch {
    fn name(&self) -> &str {
        "push_branch"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<serde_json::Value> {
        let worktree = ctx
            .worktree
            .clone()
            .context("push_branch requires a worktree")?;
        let branch = WorktreeManager::branch_name(&ctx.task.id);

        let manager = WorktreeManager::new(&ctx.repo_dir).map_err(|e| anyhow::anyhow!("{e}"))?;
        manager
            .push_branch(&worktree, &branch)
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        ctx.branch = branch.clone();
        Ok(serde_json::json!({ "branch": branch }))
    }
}

/// Run the task's test script, when one was copied into the worktree.
struct RunTests;

#[async_trait]
impl Step for RunTests {
    fn name(&self) -> &str {
        "run_tests"
    }

    fn on_fail(&self) -> &str {
        // A red test suite sends the task back for another implementation
        // round rather than burying it in failed.
        queue::INCOMING
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<serde_json::Value> {
        let script = ctx.working_dir().join("scripts").join("run-tests");
        if !script.is_file() {
            return Ok(serde_json::json!({ "skipped": "no run-tests script" }));
        }

        run_command(
            &script.to_string_lossy(),
            &[],
            ctx.working_dir(),
            ctx.timeout,
        )
        .await?;

        Ok(serde_json::json!({ "passed": true }))
    }
}

/// Create a PR for the task branch via the code-host CLI.
struct CreatePr {
    client: ApiClient,
}

#[async_trait]
impl Step for CreatePr {
    fn name(&self) -> &str {
        "create_pr"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<serde_json::Value> {
        let title = format!("{}: {}", ctx.task.id, ctx.task.title);
        let body = format!("Automated change for task {}.", ctx.task.id);
        let output = run_command(
            "gh",
            &[
                "pr",
                "create",
                "--head",
                &ctx.branch,
                "--base",
                &ctx.task.branch,
                "--title",
                &title,
                "--body",
                &body,
            ],
            &ctx.repo_dir,
            ctx.timeout,
        )
        .await?;

        // `gh pr create` prints the PR URL on the last stdout line.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let pr_url = stdout
            .lines()
            .rev()
            .find(|l| l.starts_with("http"))
            .context("gh pr create produced no URL")?
            .trim()
            .to_string();

        self.client
            .set_pr_url(&ctx.task.id, &pr_url)
            .await
            .context("failed to record PR URL")?;

        ctx.pr_url = Some(pr_url.clone());
        Ok(serde_json::json!({ "pr_url": pr_url }))
    }
}

/// Merge the task's PR.
struct MergePr;

#[async_trait]
impl Step for MergePr {
    fn name(&self) -> &str {
        "merge_pr"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<serde_json::Value> {
        let pr_url = ctx
            .pr_url
            .clone()
            .or_else(|| ctx.task.pr_url.clone())
            .context("merge_pr requires a PR")?;

        run_command(
            "gh",
            &["pr", "merge", &pr_url, "--squash", "--delete-branch"],
            &ctx.repo_dir,
            ctx.timeout,
        )
        .await?;

        Ok(serde_json::json!({ "merged": pr_url }))
    }
}

/// Surface the latest reviewer comment on the PR, or as a durable message
/// when no PR exists yet.
struct PostReviewComment {
    client: ApiClient,
}

#[async_trait]
impl Step for PostReviewComment {
    fn name(&self) -> &str {
        "post_review_comment"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<serde_json::Value> {
        let decision = self
            .client
            .list_messages(&ctx.task.id, Some("decision"))
            .await?
            .pop();

        let comment = decision
            .as_ref()
            .and_then(|m| m.content.get("comment"))
            .and_then(|c| c.as_str())
            .unwrap_or("(no reviewer comment)")
            .to_string();

        match ctx.pr_url.clone().or_else(|| ctx.task.pr_url.clone()) {
            Some(pr_url) => {
                run_command(
                    "gh",
                    &["pr", "comment", &pr_url, "--body", &comment],
                    &ctx.repo_dir,
                    ctx.timeout,
                )
                .await?;
                Ok(serde_json::json!({ "commented_on": pr_url }))
            }
            None => {
                self.client
                    .post_message(
                        &ctx.task.id,
                        "flow",
                        "review_comment",
                        serde_json::json!({ "comment": comment }),
                    )
                    .await?;
                Ok(serde_json::json!({ "posted_message": true }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use octopoid_db::models::Priority;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "a task".to_string(),
            role: "implement".to_string(),
            priority: Priority::P2,
            queue: queue::PROVISIONAL.to_string(),
            branch: "main".to_string(),
            project_id: None,
            flow: None,
            blocked_by: None,
            claimed_by: None,
            orchestrator: None,
            claimed_from: None,
            lease_expires_at: None,
            version: 3,
            commits_count: 1,
            turns_used: 10,
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

    struct Recorder {
        step_name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl Step for Recorder {
        fn name(&self) -> &str {
            self.step_name
        }

        async fn run(&self, _ctx: &mut StepContext) -> Result<serde_json::Value> {
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    #[test]
    fn registry_register_and_get() {
        let mut registry = StepRegistry::new();
        assert!(registry.is_empty());

        registry.register(Recorder {
            step_name: "alpha",
            fail: false,
        });
        assert_eq!(registry.len(), 1);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());
    }

    #[test]
    fn registry_replaces_same_name() {
        let mut registry = StepRegistry::new();
        registry.register(Recorder {
            step_name: "alpha",
            fail: false,
        });
        let old = registry.register(Recorder {
            step_name: "alpha",
            fail: true,
        });
        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn builtin_registry_has_the_catalog() {
        let registry = builtin_registry(ApiClient::new("http://localhost:1"));
        let mut names = registry.list();
        names.sort();
        assert_eq!(
            names,
            vec![
                "create_pr",
                "merge_pr",
                "post_review_comment",
                "push_branch",
                "run_tests"
            ]
        );
    }

    #[tokio::test]
    async fn run_tests_skips_without_script() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut ctx = StepContext {
            task: task("TASK-1"),
            worktree: None,
            repo_dir: tmp.path().to_path_buf(),
            branch: "agent/TASK-1".to_string(),
            pr_url: None,
            timeout: Duration::from_secs(5),
        };

        let step = RunTests;
        let metadata = step.run(&mut ctx).await.unwrap();
        assert!(metadata.get("skipped").is_some());
    }

    #[tokio::test]
    async fn run_tests_executes_script_and_propagates_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let scripts = tmp.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();

        let script = scripts.join("run-tests");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut ctx = StepContext {
            task: task("TASK-1"),
            worktree: Some(tmp.path().to_path_buf()),
            repo_dir: tmp.path().to_path_buf(),
            branch: "agent/TASK-1".to_string(),
            pr_url: None,
            timeout: Duration::from_secs(5),
        };

        let step = RunTests;
        let metadata = step.run(&mut ctx).await.unwrap();
        assert_eq!(metadata["passed"], true);

        std::fs::write(&script, "#!/bin/sh\nexit 1\n").unwrap();
        let result = step.run(&mut ctx).await;
        assert!(result.is_err());
        assert_eq!(step.on_fail(), queue::INCOMING);
    }
}
