//! HTTP error type shared by all route handlers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::transitions::TransitionError;

/// An API error with a machine-readable kind.
///
/// Serialized as `{"error": <message>, "kind": <kind>}` so SDK callers can
/// classify without parsing the message text.
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: format!("{err:#}"),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        let status = match &err {
            TransitionError::NotFound { .. } => StatusCode::NOT_FOUND,
            TransitionError::WrongState { .. }
            | TransitionError::StaleVersion { .. }
            | TransitionError::LeaseNotHeld { .. } => StatusCode::CONFLICT,
            TransitionError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}
