//! The in-memory task record and its state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::datamodel::convert::ConvertDocumentsOptions;
use crate::datamodel::requests::TaskSource;
use crate::datamodel::responses::ConvertDocumentResponse;

/// Lifecycle status of a task. `Success` and `Failure` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
}

/// Batch progress counters, populated only by the remote backend.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskProcessingMeta {
    pub num_docs: u32,
    #[serde(default)]
    pub num_processed: u32,
    #[serde(default)]
    pub num_succeeded: u32,
    #[serde(default)]
    pub num_failed: u32,
}

impl TaskProcessingMeta {
    #[must_use]
    pub fn new(num_docs: u32) -> Self {
        Self {
            num_docs,
            num_processed: 0,
            num_succeeded: 0,
            num_failed: 0,
        }
    }
}

/// Handle to a ZIP archive staged on disk.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: PathBuf,
    pub filename: String,
    pub media_type: String,
}

/// Outcome of a completed task: an inline JSON body or a file on disk.
#[derive(Debug, Clone)]
pub enum TaskResult {
    Inline(Box<ConvertDocumentResponse>),
    File(FileResult),
}

/// One client submission tracked end-to-end.
///
/// Sources and options are cleared after success to release memory; the
/// result stays addressable until the task is deleted.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub task_status: TaskStatus,
    pub sources: Vec<TaskSource>,
    pub options: Option<ConvertDocumentsOptions>,
    pub result: Option<TaskResult>,
    /// Scratch directory exclusively owned by this task, removed on deletion.
    pub scratch_dir: Option<PathBuf>,
    pub processing_meta: Option<TaskProcessingMeta>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_update_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        sources: Vec<TaskSource>,
        options: ConvertDocumentsOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            task_status: TaskStatus::Pending,
            sources,
            options: Some(options),
            result: None,
            scratch_dir: None,
            processing_meta: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            last_update_at: now,
        }
    }

    /// Transition to `status`, stamping `started_at` exactly once on the
    /// first STARTED and `finished_at` exactly once on the first terminal
    /// status. `last_update_at` never moves backwards.
    pub fn set_status(&mut self, status: TaskStatus) {
        let now = Utc::now();
        if status == TaskStatus::Started && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if matches!(status, TaskStatus::Success | TaskStatus::Failure)
            && self.finished_at.is_none()
        {
            self.finished_at = Some(now);
        }
        if now > self.last_update_at {
            self.last_update_at = now;
        }
        self.task_status = status;
    }

    /// Whether the task reached a terminal status.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.task_status, TaskStatus::Success | TaskStatus::Failure)
    }
}
