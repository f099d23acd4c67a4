//! Response payloads for the HTTP and WebSocket surface.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::convert::document::DoclingDocument;
use crate::convert::engine::{ConversionStatus, ErrorItem, ProfilingItem};
use crate::datamodel::task::{TaskProcessingMeta, TaskStatus};

/// Liveness response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthCheckResponse {
    pub status: String,
}

impl Default for HealthCheckResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Acknowledgement for the clear endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClearResponse {
    pub status: String,
}

impl Default for ClearResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// The exported content of one converted document, one field per requested
/// output format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DocumentResponse {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_content: Option<DoclingDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctags_content: Option<String>,
}

/// Inline conversion response for a single document.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConvertDocumentResponse {
    pub document: DocumentResponse,
    pub status: ConversionStatus,
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
    /// Wall-clock seconds spent converting the batch.
    pub processing_time: f64,
    #[serde(default)]
    pub timings: HashMap<String, ProfilingItem>,
}

/// Task snapshot returned by the async endpoints and pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub task_status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_meta: Option<TaskProcessingMeta>,
}

/// Kind of a WebSocket frame sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Connection,
    Update,
    Error,
}

/// WebSocket frame pushed to status subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebsocketMessage {
    pub message: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskStatusResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebsocketMessage {
    #[must_use]
    pub fn connection(task: TaskStatusResponse) -> Self {
        Self {
            message: MessageKind::Connection,
            task: Some(task),
            error: None,
        }
    }

    #[must_use]
    pub fn update(task: TaskStatusResponse) -> Self {
        Self {
            message: MessageKind::Update,
            task: Some(task),
            error: None,
        }
    }

    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            message: MessageKind::Error,
            task: None,
            error: Some(error.into()),
        }
    }
}
