use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use octopoid_db::models::{queue, Flow, FlowTransitionDef};
use octopoid_db::queries::flows as db;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PutFlowRequest {
    #[serde(default = "default_cluster")]
    pub cluster: String,
    pub states: Vec<String>,
    pub transitions: Vec<FlowTransitionDef>,
}

fn default_cluster() -> String {
    "default".to_string()
}

/// PUT /flows/:name -- register or replace a flow. Registering a flow is how
/// deployments extend the set of valid queues.
pub async fn put_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PutFlowRequest>,
) -> Result<Json<Flow>, ApiError> {
    // Every flow must carry at least the built-in states so the lifecycle
    // transitions remain expressible for its tasks.
    for built_in in queue::BUILT_IN {
        if !req.states.iter().any(|s| s == built_in) {
            return Err(ApiError::bad_request(format!(
                "flow {name:?} must declare the built-in state {built_in:?}"
            )));
        }
    }

    for t in &req.transitions {
        for endpoint in [&t.from, &t.to] {
            if !req.states.iter().any(|s| s == endpoint) {
                return Err(ApiError::bad_request(format!(
                    "transition {:?} -> {:?} references undeclared state {endpoint:?}",
                    t.from, t.to
                )));
            }
        }
    }

    let flow = db::upsert_flow(&state.pool, &name, &req.cluster, &req.states, &req.transitions)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(flow))
}

/// GET /flows/:name.
pub async fn get_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Flow>, ApiError> {
    let flow = db::get_flow(&state.pool, &name)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("flow {name} not found")))?;

    Ok(Json(flow))
}

/// GET /flows.
pub async fn list_flows(State(state): State<AppState>) -> Result<Json<Vec<Flow>>, ApiError> {
    let flows = db::list_flows(&state.pool)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(flows))
}
