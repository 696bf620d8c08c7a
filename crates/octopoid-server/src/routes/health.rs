use axum::extract::State;
use axum::Json;

use crate::error::ApiError;
use crate::AppState;

/// Liveness plus database reachability.
pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    Ok(Json(serde_json::json!({
        "status": "ok",
        "database": if db_ok { "reachable" } else { "unreachable" },
    })))
}
