//! Database query functions for the `tasks` table.
//!
//! All queue movement goes through the conditional-update functions in this
//! module: one `UPDATE ... WHERE id = $1 AND version = $2 AND queue = $from`
//! per transition. Zero rows affected means the guard failed; callers
//! classify by refetching.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{queue, Priority, Task};

/// Fields for inserting a new task.
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub role: &'a str,
    pub priority: Priority,
    pub queue: &'a str,
    pub branch: &'a str,
    pub project_id: Option<&'a str>,
    pub flow: Option<&'a str>,
    pub blocked_by: Option<&'a str>,
}

/// Insert a new task row. Returns the inserted task with server-generated
/// defaults (version, counters, timestamps).
pub async fn insert_task(pool: &PgPool, new: &NewTask<'_>) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (id, title, role, priority, queue, branch, project_id, flow, blocked_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(new.id)
    .bind(new.title)
    .bind(new.role)
    .bind(new.priority)
    .bind(new.queue)
    .bind(new.branch)
    .bind(new.project_id)
    .bind(new.flow)
    .bind(new.blocked_by)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Delete a task (admin cleanup). Returns the number of rows removed.
pub async fn delete_task(pool: &PgPool, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete task")?;

    Ok(result.rows_affected())
}

/// Filters for [`list_tasks`] / [`count_tasks`]. `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub queues: Option<Vec<String>>,
    pub priorities: Option<Vec<String>>,
    pub roles: Option<Vec<String>>,
    pub claimed_by: Option<String>,
    pub project_id: Option<String>,
}

/// List tasks matching the filter, oldest first.
pub async fn list_tasks(
    pool: &PgPool,
    filter: &TaskFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE ($1::text[] IS NULL OR queue = ANY($1)) \
           AND ($2::text[] IS NULL OR priority = ANY($2)) \
           AND ($3::text[] IS NULL OR role = ANY($3)) \
           AND ($4::text IS NULL OR claimed_by = $4) \
           AND ($5::text IS NULL OR project_id = $5) \
         ORDER BY created_at ASC \
         LIMIT $6 OFFSET $7",
    )
    .bind(&filter.queues)
    .bind(&filter.priorities)
    .bind(&filter.roles)
    .bind(&filter.claimed_by)
    .bind(&filter.project_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("failed to list tasks")?;

    Ok(tasks)
}

/// Count tasks matching the filter (for list pagination).
pub async fn count_tasks(pool: &PgPool, filter: &TaskFilter) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks \
         WHERE ($1::text[] IS NULL OR queue = ANY($1)) \
           AND ($2::text[] IS NULL OR priority = ANY($2)) \
           AND ($3::text[] IS NULL OR role = ANY($3)) \
           AND ($4::text IS NULL OR claimed_by = $4) \
           AND ($5::text IS NULL OR project_id = $5)",
    )
    .bind(&filter.queues)
    .bind(&filter.priorities)
    .bind(&filter.roles)
    .bind(&filter.claimed_by)
    .bind(&filter.project_id)
    .fetch_one(pool)
    .await
    .context("failed to count tasks")?;

    Ok(row.0)
}

/// Metadata updates allowed outside the lifecycle endpoints. The queue and
/// lease columns are deliberately not reachable from here.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub priority: Option<Priority>,
    pub branch: Option<String>,
    pub paused: Option<bool>,
    pub flow: Option<String>,
    pub pr_url: Option<String>,
    /// `Some(None)` clears `blocked_by` (manual unblock); `Some(Some(id))`
    /// sets it; `None` leaves it untouched.
    pub blocked_by: Option<Option<String>>,
}

/// Apply a metadata patch. Returns the updated task, or `None` if the task
/// does not exist.
pub async fn update_task_metadata(
    pool: &PgPool,
    id: &str,
    patch: &TaskPatch,
) -> Result<Option<Task>> {
    let (set_blocked_by, blocked_by) = match &patch.blocked_by {
        Some(value) => (true, value.clone()),
        None => (false, None),
    };

    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET \
             title = COALESCE($2, title), \
             priority = COALESCE($3, priority), \
             branch = COALESCE($4, branch), \
             paused = COALESCE($5, paused), \
             flow = COALESCE($6, flow), \
             pr_url = COALESCE($7, pr_url), \
             blocked_by = CASE WHEN $8 THEN $9 ELSE blocked_by END, \
             version = version + 1, \
             updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&patch.title)
    .bind(patch.priority)
    .bind(&patch.branch)
    .bind(patch.paused)
    .bind(&patch.flow)
    .bind(&patch.pr_url)
    .bind(set_blocked_by)
    .bind(blocked_by)
    .fetch_optional(pool)
    .await
    .context("failed to update task metadata")?;

    Ok(task)
}

// -----------------------------------------------------------------------
// Lifecycle transitions
// -----------------------------------------------------------------------

/// Atomically claim the next eligible task from `source_queue`.
///
/// Eligibility: not paused, not blocked, role matches the filter when one is
/// given. Highest priority first, then oldest. `FOR UPDATE SKIP LOCKED`
/// makes concurrent claimers pick distinct rows; at most one caller wins any
/// given task.
///
/// Returns `None` when no eligible task exists.
pub async fn claim_next_task(
    pool: &PgPool,
    source_queue: &str,
    role_filter: Option<&str>,
    claimed_by: &str,
    orchestrator: &str,
    lease_seconds: i64,
) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET \
             queue = $1, \
             claimed_by = $2, \
             orchestrator = $3, \
             claimed_from = $4, \
             lease_expires_at = NOW() + make_interval(secs => $5::double precision), \
             attempt_count = attempt_count + 1, \
             version = version + 1, \
             updated_at = NOW() \
         WHERE id = ( \
             SELECT id FROM tasks \
             WHERE queue = $4 \
               AND paused = FALSE \
               AND blocked_by IS NULL \
               AND ($6::text IS NULL OR role = $6) \
             ORDER BY priority ASC, created_at ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING *",
    )
    .bind(queue::CLAIMED)
    .bind(claimed_by)
    .bind(orchestrator)
    .bind(source_queue)
    .bind(lease_seconds)
    .bind(role_filter)
    .fetch_optional(pool)
    .await
    .context("failed to claim task")?;

    Ok(task)
}

/// `claimed -> provisional`: record the agent's result metadata and clear
/// the lease fields in the same write. Guarded by version, queue, and lease
/// ownership.
pub async fn transition_submit(
    pool: &PgPool,
    id: &str,
    expected_version: i64,
    claimed_by: &str,
    commits_count: i32,
    turns_used: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET \
             queue = $1, \
             claimed_by = NULL, \
             orchestrator = NULL, \
             claimed_from = NULL, \
             lease_expires_at = NULL, \
             commits_count = $2, \
             turns_used = $3, \
             submitted_at = NOW(), \
             version = version + 1, \
             updated_at = NOW() \
         WHERE id = $4 AND version = $5 AND queue = $6 AND claimed_by = $7",
    )
    .bind(queue::PROVISIONAL)
    .bind(commits_count)
    .bind(turns_used)
    .bind(id)
    .bind(expected_version)
    .bind(queue::CLAIMED)
    .bind(claimed_by)
    .execute(pool)
    .await
    .context("failed to submit task")?;

    Ok(result.rows_affected())
}

/// `provisional -> done`: stamp acceptance metadata.
///
/// The dependent-unblock cascade is a separate statement
/// ([`cascade_unblock`]); it is idempotent, so callers retry it freely.
pub async fn transition_accept(
    pool: &PgPool,
    id: &str,
    expected_version: i64,
    accepted_by: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET \
             queue = $1, \
             accepted_by = $2, \
             completed_at = NOW(), \
             version = version + 1, \
             updated_at = NOW() \
         WHERE id = $3 AND version = $4 AND queue = $5",
    )
    .bind(queue::DONE)
    .bind(accepted_by)
    .bind(id)
    .bind(expected_version)
    .bind(queue::PROVISIONAL)
    .execute(pool)
    .await
    .context("failed to accept task")?;

    Ok(result.rows_affected())
}

/// Clear `blocked_by` on every task blocked by `done_id`.
///
/// Idempotent: clearing a field that no longer equals `done_id` affects zero
/// rows. Returns the number of tasks unblocked.
pub async fn cascade_unblock(pool: &PgPool, done_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET \
             blocked_by = NULL, \
             version = version + 1, \
             updated_at = NOW() \
         WHERE blocked_by = $1",
    )
    .bind(done_id)
    .execute(pool)
    .await
    .context("failed to cascade unblock")?;

    Ok(result.rows_affected())
}

/// `provisional -> <to_queue>`: rejection. Increments the rejection counter.
/// The default target is `incoming` (the branch is preserved so the next
/// implementer can push fixes); flow `on_fail` routing and an exhausted
/// rejection budget send the task to `failed` or a custom reviewable state
/// through the same statement.
pub async fn transition_reject(
    pool: &PgPool,
    id: &str,
    expected_version: i64,
    to_queue: &str,
    reason: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET \
             queue = $1, \
             rejection_count = rejection_count + 1, \
             failure_reason = COALESCE($2, failure_reason), \
             completed_at = CASE WHEN $1 = $3 THEN NOW() ELSE completed_at END, \
             version = version + 1, \
             updated_at = NOW() \
         WHERE id = $4 AND version = $5 AND queue = $6",
    )
    .bind(to_queue)
    .bind(reason)
    .bind(queue::FAILED)
    .bind(id)
    .bind(expected_version)
    .bind(queue::PROVISIONAL)
    .execute(pool)
    .await
    .context("failed to reject task")?;

    Ok(result.rows_affected())
}

/// `claimed -> failed`: agent failure. Clears the lease fields in the same
/// write and records the reason.
pub async fn transition_fail(
    pool: &PgPool,
    id: &str,
    expected_version: i64,
    claimed_by: &str,
    reason: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET \
             queue = $1, \
             claimed_by = NULL, \
             orchestrator = NULL, \
             claimed_from = NULL, \
             lease_expires_at = NULL, \
             failure_reason = $2, \
             completed_at = NOW(), \
             version = version + 1, \
             updated_at = NOW() \
         WHERE id = $3 AND version = $4 AND queue = $5 AND claimed_by = $6",
    )
    .bind(queue::FAILED)
    .bind(reason)
    .bind(id)
    .bind(expected_version)
    .bind(queue::CLAIMED)
    .bind(claimed_by)
    .execute(pool)
    .await
    .context("failed to fail task")?;

    Ok(result.rows_affected())
}

/// `claimed ->` re-entry queue: voluntary release by the lease holder.
///
/// The task returns to the queue it was claimed from (`incoming` for
/// implementer claims, `provisional` for reviewer claims).
pub async fn transition_requeue(
    pool: &PgPool,
    id: &str,
    expected_version: i64,
    claimed_by: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET \
             queue = COALESCE(claimed_from, $1), \
             claimed_by = NULL, \
             orchestrator = NULL, \
             claimed_from = NULL, \
             lease_expires_at = NULL, \
             version = version + 1, \
             updated_at = NOW() \
         WHERE id = $2 AND version = $3 AND queue = $4 AND claimed_by = $5",
    )
    .bind(queue::INCOMING)
    .bind(id)
    .bind(expected_version)
    .bind(queue::CLAIMED)
    .bind(claimed_by)
    .execute(pool)
    .await
    .context("failed to requeue task")?;

    Ok(result.rows_affected())
}

/// Expire every overdue lease: tasks return to their re-entry queue with all
/// claim fields cleared in one committed write. No caller identity and no
/// version guard; a concurrent submit wins via its own version check.
///
/// Returns the tasks that were expired.
pub async fn expire_overdue_leases(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET \
             queue = COALESCE(claimed_from, $1), \
             claimed_by = NULL, \
             orchestrator = NULL, \
             claimed_from = NULL, \
             lease_expires_at = NULL, \
             version = version + 1, \
             updated_at = NOW() \
         WHERE queue = $2 AND lease_expires_at < NOW() \
         RETURNING *",
    )
    .bind(queue::INCOMING)
    .bind(queue::CLAIMED)
    .fetch_all(pool)
    .await
    .context("failed to expire overdue leases")?;

    Ok(tasks)
}

// -----------------------------------------------------------------------
// Snapshot queries
// -----------------------------------------------------------------------

/// Per-(queue, role) task counts, excluding paused tasks. This feeds the
/// scheduler's backpressure guard through the poll endpoint.
pub async fn queue_counts(pool: &PgPool) -> Result<Vec<(String, String, i64)>> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT queue, role, COUNT(*) \
         FROM tasks \
         WHERE paused = FALSE \
         GROUP BY queue, role",
    )
    .fetch_all(pool)
    .await
    .context("failed to get queue counts")?;

    Ok(rows)
}

/// Count tasks with an open PR (created but not yet merged or abandoned).
pub async fn count_open_prs(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks \
         WHERE pr_url IS NOT NULL AND queue NOT IN ($1, $2)",
    )
    .bind(queue::DONE)
    .bind(queue::FAILED)
    .fetch_one(pool)
    .await
    .context("failed to count open PRs")?;

    Ok(row.0)
}

/// Record the PR URL created for a task's branch.
pub async fn set_pr_url(pool: &PgPool, id: &str, pr_url: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET pr_url = $1, version = version + 1, updated_at = NOW() \
         WHERE id = $2",
    )
    .bind(pr_url)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to set PR URL")?;

    Ok(result.rows_affected())
}
