//! Task status (poll + WebSocket) and result endpoints.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::SinkExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::datamodel::responses::{TaskStatusResponse, WebsocketMessage};
use crate::datamodel::task::Task;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::AppState;

use super::{error_response, task_result_response};

/// Capacity of each subscriber's buffered channel; slow subscribers drop
/// updates instead of blocking the rest.
const SUBSCRIBER_BUFFER: usize = 16;

/// Task routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1alpha/status/poll/{task_id}", get(task_status_poll))
        .route("/v1alpha/status/ws/{task_id}", get(task_status_ws))
        .route("/v1alpha/result/{task_id}", get(task_result))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    /// Long-poll for completion up to this many seconds.
    #[serde(default)]
    pub wait: Option<f64>,
}

/// Poll a task's status.
#[utoipa::path(
    get,
    path = "/v1alpha/status/poll/{task_id}",
    params(
        ("task_id" = String, Path, description = "Task id"),
        ("wait" = Option<f64>, Query, description = "Seconds to wait for completion")
    ),
    responses(
        (status = 200, description = "Task snapshot", body = TaskStatusResponse),
        (status = 404, description = "Unknown task"),
    )
)]
pub async fn task_status_poll(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<PollQuery>,
) -> Response {
    let wait = query.wait.unwrap_or(0.0);
    match state.orchestrator.task_status(&task_id, wait).await {
        Ok(task) => {
            let position = state
                .orchestrator
                .get_queue_position(&task_id)
                .await
                .unwrap_or(None);
            Json(snapshot_of(&task, position)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// Fetch the result of a completed task.
#[utoipa::path(
    get,
    path = "/v1alpha/result/{task_id}",
    params(("task_id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Inline result or ZIP archive"),
        (status = 404, description = "Unknown task or result not ready"),
    )
)]
pub async fn task_result(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.orchestrator.task_result(&task_id).await {
        Ok(Some(result)) => task_result_response(result).await,
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "not_found",
                "message": "Task result not found. Please wait for the task to complete.",
            })),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

/// Live status updates over WebSocket.
///
/// On connect the server sends a `connection` frame with the task snapshot;
/// every inbound client frame triggers a fresh `update`; orchestrator
/// transitions stream through the subscriber channel. The socket is closed
/// after the terminal update.
pub async fn task_status_ws(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_status_socket(socket, state, task_id))
}

async fn handle_status_socket(mut socket: WebSocket, state: AppState, task_id: String) {
    let orchestrator = &state.orchestrator;

    let first = match snapshot(orchestrator.as_ref(), &task_id).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::warn!(task_id, error = %err, "WebSocket for unknown task");
            let _ = send_frame(&mut socket, &WebsocketMessage::error("Task not found.")).await;
            let _ = socket.close().await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    let subscriber = match orchestrator.subscribe(&task_id, tx).await {
        Ok(subscriber) => subscriber,
        Err(err) => {
            let _ = send_frame(&mut socket, &WebsocketMessage::error(err.to_string())).await;
            let _ = socket.close().await;
            return;
        }
    };

    let connected = send_frame(&mut socket, &WebsocketMessage::connection(first)).await;
    if connected.is_err() {
        orchestrator.unsubscribe(&task_id, subscriber).await;
        return;
    }

    loop {
        tokio::select! {
            pushed = rx.recv() => {
                match pushed {
                    Some(message) => {
                        let terminal = is_terminal(&message);
                        if send_frame(&mut socket, &message).await.is_err() {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    // Subscribers were closed: task completed or was deleted.
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Any client frame elicits a fresh update.
                        match snapshot(orchestrator.as_ref(), &task_id).await {
                            Ok(current) => {
                                let message = WebsocketMessage::update(current);
                                let terminal = is_terminal(&message);
                                if send_frame(&mut socket, &message).await.is_err() {
                                    break;
                                }
                                if terminal {
                                    break;
                                }
                            }
                            Err(_) => {
                                let _ = send_frame(
                                    &mut socket,
                                    &WebsocketMessage::error("Task not found."),
                                )
                                .await;
                                break;
                            }
                        }
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    orchestrator.unsubscribe(&task_id, subscriber).await;
    let _ = socket.close().await;
}

async fn snapshot(
    orchestrator: &dyn Orchestrator,
    task_id: &str,
) -> Result<TaskStatusResponse, OrchestratorError> {
    let task = orchestrator.task_status(task_id, 0.0).await?;
    let position = orchestrator.get_queue_position(task_id).await?;
    Ok(snapshot_of(&task, position))
}

fn snapshot_of(task: &Task, position: Option<usize>) -> TaskStatusResponse {
    TaskStatusResponse {
        task_id: task.task_id.clone(),
        task_status: task.task_status,
        task_position: position,
        task_meta: task.processing_meta.clone(),
    }
}

fn is_terminal(message: &WebsocketMessage) -> bool {
    message
        .task
        .as_ref()
        .is_some_and(|task| {
            matches!(
                task.task_status,
                crate::datamodel::task::TaskStatus::Success
                    | crate::datamodel::task::TaskStatus::Failure
            )
        })
}

async fn send_frame(
    socket: &mut WebSocket,
    message: &WebsocketMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_default();
    socket.send(Message::Text(text.into())).await
}
