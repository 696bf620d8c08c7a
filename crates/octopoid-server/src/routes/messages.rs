use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use octopoid_db::models::Message;
use octopoid_db::queries::messages as db;
use octopoid_db::queries::messages::NewMessage;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub task_id: String,
    pub from_actor: String,
    #[serde(default)]
    pub to_actor: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub task_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub limit: Option<i64>,
}

/// POST /messages -- append to the durable mailbox.
pub async fn create_message(
    State(state): State<AppState>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let message = db::insert_message(
        &state.pool,
        &NewMessage {
            task_id: &req.task_id,
            from_actor: &req.from_actor,
            to_actor: &req.to_actor,
            kind: &req.kind,
            content: req.content,
        },
    )
    .await
    .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /messages.
pub async fn list_messages(
    State(state): State<AppState>,
    Query(q): Query<ListMessagesQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let limit = q.limit.unwrap_or(100).clamp(1, 1000);
    let messages = db::list_messages(&state.pool, q.task_id.as_deref(), q.kind.as_deref(), limit)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(messages))
}
