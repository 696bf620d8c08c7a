//! HTTP route handlers, one module per resource.

mod flows;
mod health;
mod lifecycle;
mod messages;
mod orchestrators;
mod projects;
mod roles;
mod scheduler;
mod tasks;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use octopoid_db::models::queue;
use octopoid_db::queries::flows as flow_db;

use crate::error::ApiError;
use crate::AppState;

/// Build the full `/api/v1` router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health::health))
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/claim", post(lifecycle::claim))
        .route(
            "/tasks/{id}",
            get(tasks::get_task)
                .patch(tasks::patch_task)
                .delete(tasks::delete_task),
        )
        .route("/tasks/{id}/history", get(tasks::get_history))
        .route("/tasks/{id}/submit", post(lifecycle::submit))
        .route("/tasks/{id}/accept", post(lifecycle::accept))
        .route("/tasks/{id}/reject", post(lifecycle::reject))
        .route("/tasks/{id}/fail", post(lifecycle::fail))
        .route("/tasks/{id}/requeue", post(lifecycle::requeue))
        .route(
            "/orchestrators",
            get(orchestrators::list_orchestrators),
        )
        .route("/orchestrators/register", post(orchestrators::register))
        .route(
            "/orchestrators/{id}/heartbeat",
            post(orchestrators::heartbeat),
        )
        .route("/scheduler/poll", get(scheduler::poll))
        .route("/flows", get(flows::list_flows))
        .route("/flows/{name}", get(flows::get_flow).put(flows::put_flow))
        .route("/roles", get(roles::list_roles))
        .route("/roles/register", post(roles::register))
        .route(
            "/messages",
            get(messages::list_messages).post(messages::create_message),
        )
        .route(
            "/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route("/projects/{id}", get(projects::get_project));

    Router::new()
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Validate a queue name against the built-ins and registered flow states.
///
/// Backward compatibility: while no flow is registered, any queue name is
/// accepted.
pub(crate) async fn validate_queue(pool: &PgPool, name: &str) -> Result<(), ApiError> {
    if queue::is_built_in(name) {
        return Ok(());
    }

    let flows = flow_db::count_flows(pool).await.map_err(ApiError::internal)?;
    if flows == 0 {
        return Ok(());
    }

    let states = flow_db::registered_states(pool)
        .await
        .map_err(ApiError::internal)?;
    if states.iter().any(|s| s == name) {
        return Ok(());
    }

    Err(ApiError::bad_request(format!(
        "unknown queue {name:?}: not a built-in and not declared by any registered flow"
    )))
}
