//! Progress-callback payloads posted by the remote workflow engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

/// Source that converted successfully.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SucceededDocsItem {
    pub source: String,
}

/// Source that failed to convert, with the engine's error text.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FailedDocsItem {
    pub source: String,
    pub error: String,
}

/// Progress payload, discriminated by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskProgress {
    /// Announces the total number of documents; starts the task.
    SetNumDocs { num_docs: u32 },
    /// Increments the processed counters by the payload's deltas.
    UpdateProcessed {
        num_processed: u32,
        num_succeeded: u32,
        num_failed: u32,
        docs_succeeded: Vec<SucceededDocsItem>,
        docs_failed: Vec<FailedDocsItem>,
    },
}

/// Inbound progress callback. `task_id` carries the run *name*, which the
/// remote orchestrator translates back to a run id.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressCallbackRequest {
    pub task_id: String,
    pub progress: TaskProgress,
}

/// Acknowledgement returned to the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressCallbackResponse {
    pub status: String,
}

impl Default for ProgressCallbackResponse {
    fn default() -> Self {
        Self {
            status: "ack".to_string(),
        }
    }
}

/// How a pipeline run calls back into this service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackSpec {
    #[schema(value_type = String)]
    pub url: Url,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub ca_cert: String,
}
