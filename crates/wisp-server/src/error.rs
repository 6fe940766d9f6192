use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Per-request failure, caught at the dispatcher boundary.
///
/// Every variant renders as the same generic 500 — the detail is logged
/// host-side and never leaks to the client.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route matches path: {0}")]
    NoRoute(String),

    #[error("request body is not valid JSON: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("invalid status code in action result: {0}")]
    InvalidStatus(u16),

    #[error("invocation failed: {0}")]
    Invocation(#[from] action_runner::ActionError),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
    }
}
