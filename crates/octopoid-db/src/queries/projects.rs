//! Database query functions for the `projects` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Project, ProjectStatus};

/// Fields for inserting a new project.
#[derive(Debug, Clone)]
pub struct NewProject<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub branch: &'a str,
    pub base_branch: &'a str,
    pub auto_accept: bool,
}

/// Insert a new project row.
pub async fn insert_project(pool: &PgPool, new: &NewProject<'_>) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (id, title, branch, base_branch, auto_accept) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(new.id)
    .bind(new.title)
    .bind(new.branch)
    .bind(new.base_branch)
    .bind(new.auto_accept)
    .fetch_one(pool)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

/// Fetch a single project by ID.
pub async fn get_project(pool: &PgPool, id: &str) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch project")?;

    Ok(project)
}

/// List all projects, newest first.
pub async fn list_projects(pool: &PgPool) -> Result<Vec<Project>> {
    let projects =
        sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .context("failed to list projects")?;

    Ok(projects)
}

/// Update a project's status.
pub async fn update_project_status(
    pool: &PgPool,
    id: &str,
    status: ProjectStatus,
) -> Result<u64> {
    let result = sqlx::query("UPDATE projects SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update project status")?;

    Ok(result.rows_affected())
}
