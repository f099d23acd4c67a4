//! Progress intake for the remote execution backend.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crate::datamodel::callback::{ProgressCallbackRequest, ProgressCallbackResponse};
use crate::AppState;

use super::error_response;

/// Callback routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1alpha/callback/task/progress", post(task_progress))
}

/// Receive a progress update from the workflow engine.
#[utoipa::path(
    post,
    path = "/v1alpha/callback/task/progress",
    request_body = ProgressCallbackRequest,
    responses(
        (status = 200, description = "Progress applied", body = ProgressCallbackResponse),
        (status = 400, description = "Invalid progress payload"),
        (status = 404, description = "Unknown task"),
    )
)]
pub async fn task_progress(
    State(state): State<AppState>,
    Json(request): Json<ProgressCallbackRequest>,
) -> Response {
    tracing::debug!(task = %request.task_id, "Received progress callback");
    match state.orchestrator.receive_task_progress(request).await {
        Ok(()) => Json(ProgressCallbackResponse::default()).into_response(),
        Err(err) => error_response(&err),
    }
}
