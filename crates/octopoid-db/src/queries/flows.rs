//! Database query functions for the `flows` table.

use anyhow::{Context, Result};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::{Flow, FlowTransitionDef};

/// Register a flow, replacing any previous definition of the same name.
pub async fn upsert_flow(
    pool: &PgPool,
    name: &str,
    cluster: &str,
    states: &[String],
    transitions: &[FlowTransitionDef],
) -> Result<Flow> {
    let flow = sqlx::query_as::<_, Flow>(
        "INSERT INTO flows (name, cluster, states, transitions) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (name) DO UPDATE SET \
             cluster = EXCLUDED.cluster, \
             states = EXCLUDED.states, \
             transitions = EXCLUDED.transitions, \
             updated_at = NOW() \
         RETURNING *",
    )
    .bind(name)
    .bind(cluster)
    .bind(Json(states))
    .bind(Json(transitions))
    .fetch_one(pool)
    .await
    .context("failed to upsert flow")?;

    Ok(flow)
}

/// Fetch a single flow by name.
pub async fn get_flow(pool: &PgPool, name: &str) -> Result<Option<Flow>> {
    let flow = sqlx::query_as::<_, Flow>("SELECT * FROM flows WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch flow")?;

    Ok(flow)
}

/// List all registered flows.
pub async fn list_flows(pool: &PgPool) -> Result<Vec<Flow>> {
    let flows = sqlx::query_as::<_, Flow>("SELECT * FROM flows ORDER BY name ASC")
        .fetch_all(pool)
        .await
        .context("failed to list flows")?;

    Ok(flows)
}

/// Count registered flows. Queue validation is skipped entirely while this
/// is zero (backward compatibility for unregistered deployments).
pub async fn count_flows(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM flows")
        .fetch_one(pool)
        .await
        .context("failed to count flows")?;

    Ok(row.0)
}

/// The union of every state declared by any registered flow.
pub async fn registered_states(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT jsonb_array_elements_text(states) FROM flows",
    )
    .fetch_all(pool)
    .await
    .context("failed to collect registered flow states")?;

    Ok(rows.into_iter().map(|(s,)| s).collect())
}
