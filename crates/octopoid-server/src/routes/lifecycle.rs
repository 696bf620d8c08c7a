//! Lifecycle handlers: the only HTTP surface that moves tasks between
//! queues. Each handler delegates to [`Transitions`] and maps the typed
//! transition errors onto HTTP statuses.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use octopoid_db::models::{queue, Task};

use crate::error::ApiError;
use crate::routes::validate_queue;
use crate::transitions::Transitions;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub orchestrator: String,
    pub agent: String,
    #[serde(default)]
    pub role_filter: Option<String>,
    /// Source queue; defaults to `incoming`. Reviewer blueprints claim from
    /// `provisional`.
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub lease_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub version: i64,
    pub agent: String,
    #[serde(default)]
    pub commits_count: i32,
    #[serde(default)]
    pub turns_used: i32,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub version: i64,
    pub accepted_by: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub version: i64,
    pub rejected_by: String,
    #[serde(default)]
    pub reason: String,
    /// Target queue; defaults to `incoming`. Flow `on_fail` routing may name
    /// `failed` or a registered custom state.
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub version: i64,
    pub agent: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RequeueRequest {
    pub version: i64,
    pub agent: String,
    #[serde(default)]
    pub reason: String,
}

/// POST /tasks/claim -- atomic claim. The response body is the claimed task,
/// or `null` when nothing is eligible.
pub async fn claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<Option<Task>>, ApiError> {
    let source_queue = req.queue.as_deref().unwrap_or(queue::INCOMING);
    if source_queue == queue::CLAIMED {
        return Err(ApiError::bad_request("cannot claim from the claimed queue"));
    }
    validate_queue(&state.pool, source_queue).await?;

    let lease_seconds = req.lease_seconds.unwrap_or(state.config.lease_seconds);
    if lease_seconds <= 0 {
        return Err(ApiError::bad_request("lease_seconds must be positive"));
    }

    let claimed = Transitions::claim(
        &state.pool,
        source_queue,
        req.role_filter.as_deref(),
        &req.agent,
        &req.orchestrator,
        lease_seconds,
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(claimed))
}

/// POST /tasks/:id/submit -- claimed -> provisional.
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Task>, ApiError> {
    let task = Transitions::submit(
        &state.pool,
        &id,
        req.version,
        &req.agent,
        req.commits_count,
        req.turns_used,
        req.notes.as_deref(),
    )
    .await?;

    Ok(Json(task))
}

/// POST /tasks/:id/accept -- provisional -> done, plus the dependent
/// unblock cascade.
pub async fn accept(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AcceptRequest>,
) -> Result<Json<Task>, ApiError> {
    let task = Transitions::accept(&state.pool, &id, req.version, &req.accepted_by).await?;

    Ok(Json(task))
}

/// POST /tasks/:id/reject -- provisional -> incoming (or failed once the
/// rejection budget is exhausted; flows may route elsewhere via `to`).
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<Task>, ApiError> {
    if let Some(ref to) = req.to {
        if to == queue::CLAIMED || to == queue::DONE || to == queue::PROVISIONAL {
            return Err(ApiError::bad_request(format!(
                "reject cannot route a task to {to:?}"
            )));
        }
        validate_queue(&state.pool, to).await?;
    }

    let task = Transitions::reject(
        &state.pool,
        &id,
        req.version,
        &req.rejected_by,
        &req.reason,
        state.config.rejection_budget,
        req.to.as_deref(),
    )
    .await?;

    Ok(Json(task))
}

/// POST /tasks/:id/fail -- claimed -> failed.
pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FailRequest>,
) -> Result<Json<Task>, ApiError> {
    let task = Transitions::fail(&state.pool, &id, req.version, &req.agent, &req.reason).await?;

    Ok(Json(task))
}

/// POST /tasks/:id/requeue -- claimed -> re-entry queue.
pub async fn requeue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RequeueRequest>,
) -> Result<Json<Task>, ApiError> {
    let task =
        Transitions::requeue(&state.pool, &id, req.version, &req.agent, &req.reason).await?;

    Ok(Json(task))
}
