//! Task CRUD handlers. Queue movement is *not* available here: the PATCH
//! handler rejects any body that mentions `queue`, pointing callers at the
//! lifecycle endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use octopoid_db::models::{queue, Priority, Task, TaskHistory};
use octopoid_db::queries::history as history_db;
use octopoid_db::queries::projects as project_db;
use octopoid_db::queries::roles as role_db;
use octopoid_db::queries::tasks as task_db;
use octopoid_db::queries::tasks::{NewTask, TaskFilter, TaskPatch};

use crate::error::ApiError;
use crate::routes::validate_queue;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub id: Option<String>,
    pub title: String,
    pub role: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub flow: Option<String>,
    #[serde(default)]
    pub blocked_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub queue: Option<String>,
    pub priority: Option<String>,
    pub role: Option<String>,
    pub claimed_by: Option<String>,
    pub project_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub total: i64,
}

/// Metadata fields a PATCH may touch. `blocked_by` is handled separately so
/// `null` (manual unblock) can be told apart from "absent".
#[derive(Debug, Default, Deserialize)]
pub struct PatchTaskRequest {
    pub title: Option<String>,
    pub priority: Option<Priority>,
    pub branch: Option<String>,
    pub paused: Option<bool>,
    pub flow: Option<String>,
    pub pr_url: Option<String>,
}

fn split_csv(value: &Option<String>) -> Option<Vec<String>> {
    value.as_ref().map(|csv| {
        csv.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let queue_name = req.queue.as_deref().unwrap_or(queue::INCOMING);
    if queue_name == queue::DONE || queue_name == queue::CLAIMED {
        return Err(ApiError::bad_request(format!(
            "cannot create a task in queue {queue_name:?}; use the lifecycle endpoints \
             (/tasks/:id/accept, /tasks/claim) to move tasks there"
        )));
    }
    validate_queue(&state.pool, queue_name).await?;

    // Role validation only applies once orchestrators have declared roles.
    let registered_roles = role_db::count_roles(&state.pool)
        .await
        .map_err(ApiError::internal)?;
    if registered_roles > 0
        && !role_db::role_exists(&state.pool, &req.role)
            .await
            .map_err(ApiError::internal)?
    {
        return Err(ApiError::bad_request(format!(
            "unknown role {:?}: not registered by any orchestrator",
            req.role
        )));
    }

    // A task created under a project inherits the project's shared branch
    // unless the request names one explicitly.
    let mut branch = req.branch.clone();
    if let Some(ref project_id) = req.project_id {
        let project = project_db::get_project(&state.pool, project_id)
            .await
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::bad_request(format!("project {project_id:?} not found")))?;
        if branch.is_none() {
            branch = Some(project.branch);
        }
    }

    let id = req
        .id
        .clone()
        .unwrap_or_else(|| format!("TASK-{}", &Uuid::new_v4().simple().to_string()[..8]));

    let task = task_db::insert_task(
        &state.pool,
        &NewTask {
            id: &id,
            title: &req.title,
            role: &req.role,
            priority: req.priority.unwrap_or(Priority::P2),
            queue: queue_name,
            branch: branch.as_deref().unwrap_or("main"),
            project_id: req.project_id.as_deref(),
            flow: req.flow.as_deref(),
            blocked_by: req.blocked_by.as_deref(),
        },
    )
    .await
    .map_err(ApiError::internal)?;

    history_db::append_history(
        &state.pool,
        &task.id,
        "create",
        "",
        &serde_json::json!({ "queue": task.queue }),
    )
    .await
    .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let filter = TaskFilter {
        queues: split_csv(&q.queue),
        priorities: split_csv(&q.priority),
        roles: split_csv(&q.role),
        claimed_by: q.claimed_by,
        project_id: q.project_id,
    };

    let limit = q.limit.unwrap_or(100).clamp(1, 1000);
    let offset = q.offset.unwrap_or(0).max(0);

    let tasks = task_db::list_tasks(&state.pool, &filter, limit, offset)
        .await
        .map_err(ApiError::internal)?;
    let total = task_db::count_tasks(&state.pool, &filter)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(TaskListResponse { tasks, total }))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = task_db::get_task(&state.pool, &id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))?;

    Ok(Json(task))
}

pub async fn patch_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<Task>, ApiError> {
    // Queue moves bypass every guard the state machine provides, so they are
    // rejected outright -- even when the value matches the current queue.
    if body.get("queue").is_some() {
        return Err(ApiError::bad_request(
            "the queue field cannot be updated directly; use the lifecycle endpoints \
             (/tasks/claim, /tasks/:id/submit, /tasks/:id/accept, /tasks/:id/reject, \
             /tasks/:id/fail, /tasks/:id/requeue)",
        ));
    }

    let blocked_by = match body.get("blocked_by") {
        None => None,
        Some(serde_json::Value::Null) => Some(None),
        Some(serde_json::Value::String(s)) => Some(Some(s.clone())),
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "blocked_by must be a string or null, got: {other}"
            )));
        }
    };

    let req: PatchTaskRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("invalid patch body: {e}")))?;

    let patch = TaskPatch {
        title: req.title,
        priority: req.priority,
        branch: req.branch,
        paused: req.paused,
        flow: req.flow,
        pr_url: req.pr_url,
        blocked_by,
    };

    let task = task_db::update_task_metadata(&state.pool, &id, &patch)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))?;

    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let rows = task_db::delete_task(&state.pool, &id)
        .await
        .map_err(ApiError::internal)?;
    if rows == 0 {
        return Err(ApiError::not_found(format!("task {id} not found")));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TaskHistory>>, ApiError> {
    let events = history_db::list_history(&state.pool, &id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(events))
}
