//! Database query functions for the `orchestrators` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Orchestrator, OrchestratorStatus};

/// Register an orchestrator, or refresh its registration if the id already
/// exists. Either way the orchestrator comes back `active` with a fresh
/// heartbeat.
pub async fn upsert_orchestrator(
    pool: &PgPool,
    id: &str,
    cluster: &str,
    machine_id: &str,
    repo_url: &str,
) -> Result<Orchestrator> {
    let orchestrator = sqlx::query_as::<_, Orchestrator>(
        "INSERT INTO orchestrators (id, cluster, machine_id, repo_url) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (id) DO UPDATE SET \
             repo_url = EXCLUDED.repo_url, \
             status = 'active', \
             last_heartbeat_at = NOW(), \
             version = orchestrators.version + 1 \
         RETURNING *",
    )
    .bind(id)
    .bind(cluster)
    .bind(machine_id)
    .bind(repo_url)
    .fetch_one(pool)
    .await
    .context("failed to upsert orchestrator")?;

    Ok(orchestrator)
}

/// Record a heartbeat. Returns the number of rows touched (0 means the
/// orchestrator was never registered).
pub async fn heartbeat(pool: &PgPool, id: &str, status: OrchestratorStatus) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE orchestrators SET \
             status = $1, \
             last_heartbeat_at = NOW(), \
             version = version + 1 \
         WHERE id = $2",
    )
    .bind(status)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record heartbeat")?;

    Ok(result.rows_affected())
}

/// Fetch a single orchestrator by ID.
pub async fn get_orchestrator(pool: &PgPool, id: &str) -> Result<Option<Orchestrator>> {
    let orchestrator = sqlx::query_as::<_, Orchestrator>(
        "SELECT * FROM orchestrators WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch orchestrator")?;

    Ok(orchestrator)
}

/// List all orchestrators, most recently seen first.
pub async fn list_orchestrators(pool: &PgPool) -> Result<Vec<Orchestrator>> {
    let orchestrators = sqlx::query_as::<_, Orchestrator>(
        "SELECT * FROM orchestrators ORDER BY last_heartbeat_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list orchestrators")?;

    Ok(orchestrators)
}

/// Mark every orchestrator whose heartbeat is older than `offline_seconds`
/// as offline. Their claimed tasks are left alone; the lease scan reclaims
/// those on its own schedule.
///
/// Returns the orchestrators that were newly marked offline.
pub async fn mark_stale_offline(pool: &PgPool, offline_seconds: i64) -> Result<Vec<Orchestrator>> {
    let orchestrators = sqlx::query_as::<_, Orchestrator>(
        "UPDATE orchestrators SET \
             status = 'offline', \
             version = version + 1 \
         WHERE status != 'offline' \
           AND last_heartbeat_at < NOW() - make_interval(secs => $1::double precision) \
         RETURNING *",
    )
    .bind(offline_seconds)
    .fetch_all(pool)
    .await
    .context("failed to mark stale orchestrators offline")?;

    Ok(orchestrators)
}
