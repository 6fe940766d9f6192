use std::time::Instant;

use action_runner::{ActionResponse, InvocationTarget};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

use crate::error::DispatchError;
use crate::state::AppState;

/// Fallback handler: every request path is resolved against the registry.
///
/// Failures anywhere in the pipeline are caught here, logged with detail,
/// and converted to a generic 500. The access line and the duration
/// measurement are emitted for every completed attempt, success or failure.
pub async fn dispatch(State(app): State<AppState>, req: Request) -> Response {
    let start = Instant::now();
    let request_id = uuid::Uuid::new_v4();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match handle(&app, req).await {
        Ok(response) => response,
        Err(err) => {
            error!(request_id = %request_id, path = %path, error = %err, "request failed");
            err.into_response()
        }
    };

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "access"
    );
    info!(
        request_id = %request_id,
        duration_ms = start.elapsed().as_millis() as u64,
        "request complete"
    );

    response
}

async fn handle(app: &AppState, req: Request) -> Result<Response, DispatchError> {
    let path = req.uri().path().to_string();
    let route = app
        .registry
        .resolve(&path)
        .cloned()
        .ok_or_else(|| DispatchError::NoRoute(path.clone()))?;

    let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| DispatchError::BodyRead(e.to_string()))?;
    let params: serde_json::Value = if bytes.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_slice(&bytes)?
    };

    let target = InvocationTarget {
        source_dir: route.source_dir.clone(),
        entry_module: route.entry_module.clone(),
        main_export: route.main_export.clone(),
    };
    let result = action_runner::invoke(&target, &params).await?;
    render_response(result)
}

/// Map an invocation result onto an HTTP response: status from
/// `statusCode` (default 200), body written verbatim as JSON.
fn render_response(result: ActionResponse) -> Result<Response, DispatchError> {
    let status = match result.status_code {
        None => StatusCode::OK,
        Some(code) => {
            StatusCode::from_u16(code).map_err(|_| DispatchError::InvalidStatus(code))?
        }
    };
    Ok((status, axum::Json(result.body)).into_response())
}
