//! Database query functions for the `roles` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Role;

/// Register a role name. Idempotent via `ON CONFLICT DO NOTHING`.
pub async fn register_role(pool: &PgPool, name: &str, cluster: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO roles (name, cluster) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(name)
    .bind(cluster)
    .execute(pool)
    .await
    .context("failed to register role")?;

    Ok(())
}

/// List all registered roles.
pub async fn list_roles(pool: &PgPool) -> Result<Vec<Role>> {
    let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name ASC")
        .fetch_all(pool)
        .await
        .context("failed to list roles")?;

    Ok(roles)
}

/// Count registered roles. Role validation only applies once at least one
/// role has been registered.
pub async fn count_roles(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM roles")
        .fetch_one(pool)
        .await
        .context("failed to count roles")?;

    Ok(row.0)
}

/// Check whether a specific role is registered.
pub async fn role_exists(pool: &PgPool, name: &str) -> Result<bool> {
    let row: (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM roles WHERE name = $1)")
            .bind(name)
            .fetch_one(pool)
            .await
            .context("failed to check role existence")?;

    Ok(row.0)
}
