use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use octopoid_db::models::{Orchestrator, OrchestratorStatus};
use octopoid_db::queries::orchestrators as db;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub cluster: String,
    pub machine_id: String,
    #[serde(default)]
    pub repo_url: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub status: Option<OrchestratorStatus>,
}

/// POST /orchestrators/register -- idempotent presence registration.
/// The orchestrator id is always `<cluster>-<machine_id>`.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Orchestrator>, ApiError> {
    if req.cluster.is_empty() || req.machine_id.is_empty() {
        return Err(ApiError::bad_request(
            "cluster and machine_id must be non-empty",
        ));
    }

    let id = format!("{}-{}", req.cluster, req.machine_id);
    let orchestrator =
        db::upsert_orchestrator(&state.pool, &id, &req.cluster, &req.machine_id, &req.repo_url)
            .await
            .map_err(ApiError::internal)?;

    Ok(Json(orchestrator))
}

/// POST /orchestrators/:id/heartbeat.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Orchestrator>, ApiError> {
    let status = req.status.unwrap_or(OrchestratorStatus::Active);
    let rows = db::heartbeat(&state.pool, &id, status)
        .await
        .map_err(ApiError::internal)?;
    if rows == 0 {
        return Err(ApiError::not_found(format!(
            "orchestrator {id} not registered"
        )));
    }

    let orchestrator = db::get_orchestrator(&state.pool, &id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("orchestrator {id} not registered")))?;

    Ok(Json(orchestrator))
}

/// GET /orchestrators.
pub async fn list_orchestrators(
    State(state): State<AppState>,
) -> Result<Json<Vec<Orchestrator>>, ApiError> {
    let orchestrators = db::list_orchestrators(&state.pool)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(orchestrators))
}
