//! HTTP API endpoints.

pub mod callback;
pub mod clear;
pub mod convert;
pub mod health;
pub mod tasks;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::io::ReaderStream;
use utoipa::OpenApi;

use crate::convert::engine::EngineError;
use crate::datamodel::task::TaskResult;
use crate::orchestrator::OrchestratorError;
use crate::AppState;

/// Create the API router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(convert::router())
        .merge(tasks::router())
        .merge(callback::router())
        .merge(clear::router())
        .route("/openapi.json", get(openapi_json))
}

/// OpenAPI document for the service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Docling Serve",
        description = "Asynchronous document-conversion job orchestration service"
    ),
    paths(
        health::health,
        convert::process_url,
        convert::process_url_async,
        tasks::task_status_poll,
        tasks::task_result,
        callback::task_progress,
        clear::clear_converters,
        clear::clear_results,
    ),
    components(schemas(
        crate::datamodel::convert::ConvertDocumentsOptions,
        crate::datamodel::requests::ConvertDocumentsRequest,
        crate::datamodel::responses::ConvertDocumentResponse,
        crate::datamodel::responses::TaskStatusResponse,
        crate::datamodel::responses::WebsocketMessage,
        crate::datamodel::callback::ProgressCallbackRequest,
        crate::datamodel::callback::ProgressCallbackResponse,
    ))
)]
struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Translate orchestrator errors into HTTP error responses.
pub(crate) fn error_response(err: &OrchestratorError) -> Response {
    let (status, error, message) = match err {
        OrchestratorError::TaskNotFound => (
            StatusCode::NOT_FOUND,
            "not_found",
            "Task not found.".to_string(),
        ),
        OrchestratorError::ProgressInvalid(reason) => {
            (StatusCode::BAD_REQUEST, "invalid_progress", reason.clone())
        }
        OrchestratorError::Engine(EngineError::UnavailableEngine(_)) => (
            StatusCode::BAD_REQUEST,
            "unavailable_engine",
            err.to_string(),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            err.to_string(),
        ),
    };
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "message": message,
        })),
    )
        .into_response()
}

/// Render a task result: inline JSON body, or the staged archive streamed
/// with attachment headers.
pub(crate) async fn task_result_response(result: TaskResult) -> Response {
    match result {
        TaskResult::Inline(response) => (StatusCode::OK, Json(*response)).into_response(),
        TaskResult::File(file) => {
            let handle = match tokio::fs::File::open(&file.path).await {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::error!(path = %file.path.display(), error = %err, "Result archive is gone");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(serde_json::json!({
                            "error": "internal_error",
                            "message": "Result file is no longer available",
                        })),
                    )
                        .into_response();
                }
            };
            let stream = ReaderStream::new(handle);
            let headers = [
                (header::CONTENT_TYPE, file.media_type),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file.filename),
                ),
            ];
            (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
        }
    }
}
