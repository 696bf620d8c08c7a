//! The task state machine: every queue movement on the server goes through
//! the operations here.
//!
//! Each transition is one conditional `UPDATE` guarded by the source queue,
//! the caller's version snapshot, and (for lease-holding transitions) lease
//! ownership, followed by an append-only history row. Zero rows affected is
//! classified by refetching the task, never retried blindly.

use anyhow::Result;
use sqlx::PgPool;
use thiserror::Error;

use octopoid_db::models::{queue, Task};
use octopoid_db::queries::history;
use octopoid_db::queries::tasks as db;

/// Typed failure of a transition attempt.
///
/// `wrong_state` is terminal for the call; `stale_version` is retriable
/// after a refetch; `not_found` is terminal.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("task {id} not found")]
    NotFound { id: String },

    #[error("task {id} is in queue {actual:?}, expected {expected:?}")]
    WrongState {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("task {id} version {expected} is stale (current {actual})")]
    StaleVersion { id: String, expected: i64, actual: i64 },

    #[error("task {id} lease is not held by {caller:?}")]
    LeaseNotHeld { id: String, caller: String },

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

impl TransitionError {
    /// Machine-readable kind, as used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::WrongState { .. } | Self::LeaseNotHeld { .. } => "wrong_state",
            Self::StaleVersion { .. } => "stale_version",
            Self::Db(_) => "internal",
        }
    }
}

/// Classify a zero-rows-affected conditional update by refetching the row.
///
/// Order matters: a missing row is `not_found`; a queue mismatch is
/// `wrong_state`; a version mismatch is `stale_version`. When queue and
/// version both match, the caller's lease-ownership guard must have failed.
async fn classify_zero_rows(
    pool: &PgPool,
    id: &str,
    expected_queue: &str,
    expected_version: i64,
    caller: &str,
) -> TransitionError {
    match db::get_task(pool, id).await {
        Err(e) => TransitionError::Db(e),
        Ok(None) => TransitionError::NotFound { id: id.to_owned() },
        Ok(Some(task)) => {
            if task.queue != expected_queue {
                TransitionError::WrongState {
                    id: id.to_owned(),
                    expected: expected_queue.to_owned(),
                    actual: task.queue,
                }
            } else if task.version != expected_version {
                TransitionError::StaleVersion {
                    id: id.to_owned(),
                    expected: expected_version,
                    actual: task.version,
                }
            } else {
                TransitionError::LeaseNotHeld {
                    id: id.to_owned(),
                    caller: caller.to_owned(),
                }
            }
        }
    }
}

async fn refetch(pool: &PgPool, id: &str) -> Result<Task, TransitionError> {
    db::get_task(pool, id)
        .await?
        .ok_or_else(|| TransitionError::NotFound { id: id.to_owned() })
}

/// The server-side state machine. All methods return the task at its new
/// version on success.
pub struct Transitions;

impl Transitions {
    /// Atomically claim the next eligible task from `source_queue`.
    ///
    /// Returns `Ok(None)` when nothing is claimable; that is not an error.
    pub async fn claim(
        pool: &PgPool,
        source_queue: &str,
        role_filter: Option<&str>,
        agent: &str,
        orchestrator: &str,
        lease_seconds: i64,
    ) -> Result<Option<Task>> {
        let claimed = db::claim_next_task(
            pool,
            source_queue,
            role_filter,
            agent,
            orchestrator,
            lease_seconds,
        )
        .await?;

        if let Some(ref task) = claimed {
            history::append_history(
                pool,
                &task.id,
                "claim",
                agent,
                &serde_json::json!({
                    "orchestrator": orchestrator,
                    "from": source_queue,
                    "lease_expires_at": task.lease_expires_at,
                }),
            )
            .await?;
            tracing::info!(
                task_id = %task.id,
                agent = agent,
                orchestrator = orchestrator,
                "task claimed"
            );
        }

        Ok(claimed)
    }

    /// `claimed -> provisional`: record the agent's result.
    pub async fn submit(
        pool: &PgPool,
        id: &str,
        expected_version: i64,
        caller: &str,
        commits_count: i32,
        turns_used: i32,
        notes: Option<&str>,
    ) -> Result<Task, TransitionError> {
        let rows = db::transition_submit(pool, id, expected_version, caller, commits_count, turns_used)
            .await?;
        if rows == 0 {
            return Err(
                classify_zero_rows(pool, id, queue::CLAIMED, expected_version, caller).await,
            );
        }

        history::append_history(
            pool,
            id,
            "submit",
            caller,
            &serde_json::json!({
                "commits_count": commits_count,
                "turns_used": turns_used,
                "notes": notes,
            }),
        )
        .await?;

        refetch(pool, id).await
    }

    /// `provisional -> done`: acceptance plus the dependent-unblock cascade.
    ///
    /// The cascade runs after the accept commits and is idempotent, so a
    /// crash between the two statements is repaired by any later accept of
    /// the same task id (a no-op update plus a fresh cascade).
    pub async fn accept(
        pool: &PgPool,
        id: &str,
        expected_version: i64,
        accepted_by: &str,
    ) -> Result<Task, TransitionError> {
        let rows = db::transition_accept(pool, id, expected_version, accepted_by).await?;
        if rows == 0 {
            return Err(
                classify_zero_rows(pool, id, queue::PROVISIONAL, expected_version, accepted_by)
                    .await,
            );
        }

        let unblocked = db::cascade_unblock(pool, id).await?;
        history::append_history(
            pool,
            id,
            "accept",
            accepted_by,
            &serde_json::json!({ "unblocked": unblocked }),
        )
        .await?;
        tracing::info!(task_id = id, unblocked, "task accepted");

        refetch(pool, id).await
    }

    /// `provisional -> incoming` by default; flow `on_fail` routing may name
    /// another target, and an exhausted rejection budget forces `failed`
    /// regardless of the requested target.
    pub async fn reject(
        pool: &PgPool,
        id: &str,
        expected_version: i64,
        rejected_by: &str,
        reason: &str,
        rejection_budget: i32,
        target: Option<&str>,
    ) -> Result<Task, TransitionError> {
        let task = refetch(pool, id).await?;

        let exhausted = task.rejection_count + 1 >= rejection_budget;
        let detail;
        let (to_queue, failure_reason) = if exhausted {
            detail = format!("rejection budget exhausted: {reason}");
            (queue::FAILED, Some(detail.as_str()))
        } else {
            let to = target.unwrap_or(queue::INCOMING);
            let failure_reason = (to != queue::INCOMING).then_some(reason);
            (to, failure_reason)
        };

        let rows =
            db::transition_reject(pool, id, expected_version, to_queue, failure_reason).await?;
        if rows == 0 {
            return Err(
                classify_zero_rows(pool, id, queue::PROVISIONAL, expected_version, rejected_by)
                    .await,
            );
        }

        history::append_history(
            pool,
            id,
            "reject",
            rejected_by,
            &serde_json::json!({ "reason": reason, "to": to_queue }),
        )
        .await?;

        refetch(pool, id).await
    }

    /// `claimed -> failed`.
    pub async fn fail(
        pool: &PgPool,
        id: &str,
        expected_version: i64,
        caller: &str,
        reason: &str,
    ) -> Result<Task, TransitionError> {
        let rows = db::transition_fail(pool, id, expected_version, caller, reason).await?;
        if rows == 0 {
            return Err(
                classify_zero_rows(pool, id, queue::CLAIMED, expected_version, caller).await,
            );
        }

        history::append_history(
            pool,
            id,
            "fail",
            caller,
            &serde_json::json!({ "reason": reason }),
        )
        .await?;

        refetch(pool, id).await
    }

    /// `claimed ->` re-entry queue: voluntary release by the lease holder.
    pub async fn requeue(
        pool: &PgPool,
        id: &str,
        expected_version: i64,
        caller: &str,
        reason: &str,
    ) -> Result<Task, TransitionError> {
        let rows = db::transition_requeue(pool, id, expected_version, caller).await?;
        if rows == 0 {
            return Err(
                classify_zero_rows(pool, id, queue::CLAIMED, expected_version, caller).await,
            );
        }

        history::append_history(
            pool,
            id,
            "requeue",
            caller,
            &serde_json::json!({ "reason": reason }),
        )
        .await?;

        refetch(pool, id).await
    }

    /// Expire every overdue lease (the coordinator's scan 1). Returns the
    /// expired tasks; each one gets a history row with no caller identity.
    pub async fn expire_overdue(pool: &PgPool) -> Result<Vec<Task>> {
        let expired = db::expire_overdue_leases(pool).await?;

        for task in &expired {
            history::append_history(
                pool,
                &task.id,
                "expire",
                "",
                &serde_json::json!({ "returned_to": task.queue }),
            )
            .await?;
            tracing::warn!(task_id = %task.id, queue = %task.queue, "lease expired");
        }

        Ok(expired)
    }
}
