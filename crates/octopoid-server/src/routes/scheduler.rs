//! The batch poll endpoint: one snapshot per scheduler tick instead of a
//! handful of chatty reads.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use octopoid_db::models::{queue, OrchestratorStatus, QueueCount, SchedulerSnapshot};
use octopoid_db::queries::flows as flow_db;
use octopoid_db::queries::orchestrators as orch_db;
use octopoid_db::queries::tasks as task_db;
use octopoid_db::queries::tasks::TaskFilter;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub orchestrator: Option<String>,
}

/// GET /scheduler/poll.
pub async fn poll(
    State(state): State<AppState>,
    Query(q): Query<PollQuery>,
) -> Result<Json<SchedulerSnapshot>, ApiError> {
    let counts = task_db::queue_counts(&state.pool)
        .await
        .map_err(ApiError::internal)?;

    let claimed_total = counts
        .iter()
        .filter(|(q, _, _)| q == queue::CLAIMED)
        .map(|(_, _, n)| *n)
        .sum();

    let queue_counts = counts
        .into_iter()
        .map(|(queue, role, count)| QueueCount { queue, role, count })
        .collect();

    let open_prs = task_db::count_open_prs(&state.pool)
        .await
        .map_err(ApiError::internal)?;

    let provisional_filter = TaskFilter {
        queues: Some(vec![queue::PROVISIONAL.to_string()]),
        ..Default::default()
    };
    let provisional = task_db::list_tasks(&state.pool, &provisional_filter, 200, 0)
        .await
        .map_err(ApiError::internal)?;

    let orchestrator_registered = match q.orchestrator.as_deref() {
        None => false,
        Some(id) => orch_db::get_orchestrator(&state.pool, id)
            .await
            .map_err(ApiError::internal)?
            .is_some_and(|o| o.status != OrchestratorStatus::Offline),
    };

    let registered_states = flow_db::registered_states(&state.pool)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(SchedulerSnapshot {
        queue_counts,
        claimed_total,
        open_prs,
        provisional,
        orchestrator_registered,
        registered_states,
    }))
}
