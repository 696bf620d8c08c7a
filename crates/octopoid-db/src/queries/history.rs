//! Database query functions for the append-only `task_history` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::TaskHistory;

/// Append a history event for a task.
///
/// History is best-effort bookkeeping: it is written after the transition's
/// conditional update commits, never inside it.
pub async fn append_history(
    pool: &PgPool,
    task_id: &str,
    event: &str,
    actor: &str,
    details: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_history (task_id, event, actor, details) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(task_id)
    .bind(event)
    .bind(actor)
    .bind(details)
    .execute(pool)
    .await
    .context("failed to append task history")?;

    Ok(())
}

/// List a task's history in write order.
pub async fn list_history(pool: &PgPool, task_id: &str) -> Result<Vec<TaskHistory>> {
    let events = sqlx::query_as::<_, TaskHistory>(
        "SELECT * FROM task_history WHERE task_id = $1 ORDER BY id ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list task history")?;

    Ok(events)
}
