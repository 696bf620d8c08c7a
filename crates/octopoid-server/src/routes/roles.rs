use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use octopoid_db::models::Role;
use octopoid_db::queries::roles as db;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRolesRequest {
    pub roles: Vec<String>,
    #[serde(default = "default_cluster")]
    pub cluster: String,
}

fn default_cluster() -> String {
    "default".to_string()
}

/// POST /roles/register -- declare the roles an orchestrator's fleet serves.
/// Once any role is registered, task creation validates against the set.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRolesRequest>,
) -> Result<StatusCode, ApiError> {
    if req.roles.is_empty() {
        return Err(ApiError::bad_request("roles must be non-empty"));
    }

    for role in &req.roles {
        db::register_role(&state.pool, role, &req.cluster)
            .await
            .map_err(ApiError::internal)?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// GET /roles.
pub async fn list_roles(State(state): State<AppState>) -> Result<Json<Vec<Role>>, ApiError> {
    let roles = db::list_roles(&state.pool)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(roles))
}
