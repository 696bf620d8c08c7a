use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use octopoid_db::models::Project;
use octopoid_db::queries::projects as db;
use octopoid_db::queries::projects::NewProject;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub id: Option<String>,
    pub title: String,
    pub branch: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub auto_accept: bool,
}

fn default_base_branch() -> String {
    "main".to_string()
}

/// POST /projects.
pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let id = req
        .id
        .clone()
        .unwrap_or_else(|| format!("PROJ-{}", &Uuid::new_v4().simple().to_string()[..8]));

    let project = db::insert_project(
        &state.pool,
        &NewProject {
            id: &id,
            title: &req.title,
            branch: &req.branch,
            base_branch: &req.base_branch,
            auto_accept: req.auto_accept,
        },
    )
    .await
    .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /projects/:id.
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    let project = db::get_project(&state.pool, &id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("project {id} not found")))?;

    Ok(Json(project))
}

/// GET /projects.
pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<Project>>, ApiError> {
    let projects = db::list_projects(&state.pool)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(projects))
}
