//! Convert endpoints: synchronous and asynchronous, JSON and multipart.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crate::convert::prepare_pipeline;
use crate::datamodel::convert::ConvertDocumentsOptions;
use crate::datamodel::requests::{ConvertDocumentsRequest, DocumentStream, TaskSource};
use crate::datamodel::responses::TaskStatusResponse;
use crate::logging::OpTimer;
use crate::orchestrator::OrchestratorError;
use crate::AppState;

use super::{error_response, task_result_response};

/// Convert routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1alpha/convert/source", post(process_url))
        .route("/v1alpha/convert/file", post(process_file))
        .route("/v1alpha/convert/source/async", post(process_url_async))
        .route("/v1alpha/convert/file/async", post(process_file_async))
}

/// Convert document(s) from URL or base64 sources, waiting for the result.
#[utoipa::path(
    post,
    path = "/v1alpha/convert/source",
    request_body = ConvertDocumentsRequest,
    responses(
        (status = 200, description = "Inline result or ZIP archive", body = crate::datamodel::responses::ConvertDocumentResponse),
        (status = 400, description = "Unavailable engine or invalid request"),
        (status = 504, description = "Synchronous wait exceeded"),
    )
)]
pub async fn process_url(
    State(state): State<AppState>,
    Json(request): Json<ConvertDocumentsRequest>,
) -> Response {
    let (sources, options) = request.into_parts();
    convert_sync(&state, sources, options).await
}

/// Convert multipart-uploaded document(s), waiting for the result.
pub async fn process_file(State(state): State<AppState>, multipart: Multipart) -> Response {
    let (sources, options) = match parse_multipart(multipart).await {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    tracing::info!(files = sources.len(), "Received files for processing");
    convert_sync(&state, sources, options).await
}

/// Enqueue a conversion from URL or base64 sources.
#[utoipa::path(
    post,
    path = "/v1alpha/convert/source/async",
    request_body = ConvertDocumentsRequest,
    responses((status = 200, description = "Task accepted", body = TaskStatusResponse))
)]
pub async fn process_url_async(
    State(state): State<AppState>,
    Json(request): Json<ConvertDocumentsRequest>,
) -> Response {
    let (sources, options) = request.into_parts();
    convert_async(&state, sources, options).await
}

/// Enqueue a conversion from multipart uploads.
pub async fn process_file_async(State(state): State<AppState>, multipart: Multipart) -> Response {
    let (sources, options) = match parse_multipart(multipart).await {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    tracing::info!(files = sources.len(), "Received files for processing");
    convert_async(&state, sources, options).await
}

/// Synchronous path: enqueue, wait up to `max_sync_wait`, return the result.
///
/// On timeout the task keeps running and 504 is returned; the client can
/// still poll it through the async endpoints.
async fn convert_sync(
    state: &AppState,
    sources: Vec<TaskSource>,
    options: ConvertDocumentsOptions,
) -> Response {
    let timer = OpTimer::new("api", "convert_sync");

    // Build (or fetch) the converter up front so an unavailable engine is a
    // 400 before any work is queued. The instance lands in the cache the
    // worker reads from.
    if let Err(err) = prebuild_converter(state, &options).await {
        timer.finish();
        return error_response(&err);
    }

    let orchestrator = Arc::clone(&state.orchestrator);
    let task = match orchestrator.enqueue(sources, options).await {
        Ok(task) => task,
        Err(err) => {
            timer.finish();
            return error_response(&err);
        }
    };

    let wait = state.config.settings.max_sync_wait as f64;
    let task = match orchestrator.task_status(&task.task_id, wait).await {
        Ok(task) => task,
        Err(err) => {
            timer.finish();
            return error_response(&err);
        }
    };

    if !task.is_completed() {
        tracing::warn!(task_id = %task.task_id, "Synchronous wait exceeded, task keeps running");
        timer.finish();
        return (
            StatusCode::GATEWAY_TIMEOUT,
            Json(serde_json::json!({
                "error": "sync_wait_exceeded",
                "message": "Conversion did not complete in time; poll the task instead",
                "task_id": task.task_id,
            })),
        )
            .into_response();
    }

    let result = match orchestrator.task_result(&task.task_id).await {
        Ok(result) => result,
        Err(err) => {
            timer.finish();
            return error_response(&err);
        }
    };
    timer.finish();

    match result {
        Some(result) => task_result_response(result).await,
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": "conversion_failed",
                "message": "Conversion failed; see the server logs for details",
            })),
        )
            .into_response(),
    }
}

/// Asynchronous path: enqueue and return the task snapshot.
async fn convert_async(
    state: &AppState,
    sources: Vec<TaskSource>,
    options: ConvertDocumentsOptions,
) -> Response {
    let timer = OpTimer::new("api", "convert_async");
    let orchestrator = &state.orchestrator;

    let task = match orchestrator.enqueue(sources, options).await {
        Ok(task) => task,
        Err(err) => {
            timer.finish();
            return error_response(&err);
        }
    };
    let position = orchestrator
        .get_queue_position(&task.task_id)
        .await
        .unwrap_or(None);
    timer.finish();

    (
        StatusCode::OK,
        Json(TaskStatusResponse {
            task_id: task.task_id,
            task_status: task.task_status,
            task_position: position,
            task_meta: task.processing_meta,
        }),
    )
        .into_response()
}

/// Build the converter for `options` on the blocking pool, surfacing
/// engine-construction failures.
async fn prebuild_converter(
    state: &AppState,
    options: &ConvertDocumentsOptions,
) -> Result<(), OrchestratorError> {
    let spec = prepare_pipeline(options, &state.config.settings);
    let cache = Arc::clone(&state.converter_cache);
    tokio::task::spawn_blocking(move || cache.get_or_build(&spec))
        .await
        .map_err(|err| OrchestratorError::Internal(err.to_string()))??;
    Ok(())
}

/// Multipart form fields that hold lists of strings.
const LIST_FIELDS: &[&str] = &["from_formats", "to_formats", "ocr_lang"];

/// Parse a multipart upload: every `files` part becomes an in-memory
/// document stream; the remaining fields are collected into the options.
async fn parse_multipart(
    mut multipart: Multipart,
) -> Result<(Vec<TaskSource>, ConvertDocumentsOptions), Response> {
    let mut sources = Vec::new();
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(validation_error(format!("invalid multipart body: {err}"))),
        };
        let Some(name) = field.name().map(ToString::to_string) else {
            continue;
        };
        if name == "files" {
            let filename = field
                .file_name()
                .filter(|name| !name.is_empty())
                .unwrap_or("file.pdf")
                .to_string();
            let data = match field.bytes().await {
                Ok(data) => data,
                Err(err) => {
                    return Err(validation_error(format!(
                        "failed to read uploaded file {filename}: {err}"
                    )))
                }
            };
            sources.push(TaskSource::Stream(DocumentStream {
                name: filename,
                stream: data,
            }));
        } else {
            let value = match field.text().await {
                Ok(value) => value,
                Err(err) => {
                    return Err(validation_error(format!(
                        "failed to read form field {name}: {err}"
                    )))
                }
            };
            fields.entry(name).or_default().push(value);
        }
    }

    if sources.is_empty() {
        return Err(validation_error("no files were uploaded".to_string()));
    }

    let options = options_from_form(&fields).map_err(validation_error)?;
    Ok((sources, options))
}

/// Rebuild [`ConvertDocumentsOptions`] from flattened form fields. List
/// fields accept repeated values or one comma/semicolon-separated string;
/// nested models arrive as JSON strings.
fn options_from_form(
    fields: &HashMap<String, Vec<String>>,
) -> Result<ConvertDocumentsOptions, String> {
    let mut map = serde_json::Map::new();

    for (name, values) in fields {
        let value = if LIST_FIELDS.contains(&name.as_str()) {
            let items: Vec<serde_json::Value> = values
                .iter()
                .flat_map(|value| value.split([',', ';']))
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| serde_json::Value::String(item.to_string()))
                .collect();
            serde_json::Value::Array(items)
        } else {
            let raw = values
                .last()
                .cloned()
                .unwrap_or_default();
            match serde_json::from_str::<serde_json::Value>(&raw) {
                // Structured values (booleans, numbers, nested models,
                // arrays) come through as JSON.
                Ok(value) if !value.is_string() => value,
                _ => serde_json::Value::String(raw),
            }
        };
        map.insert(name.clone(), value);
    }

    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|err| format!("invalid conversion options: {err}"))
}

fn validation_error(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "validation_error",
            "message": message,
        })),
    )
        .into_response()
}
