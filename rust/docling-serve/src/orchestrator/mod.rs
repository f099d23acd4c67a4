//! Task orchestration.
//!
//! The [`Orchestrator`] trait is the polymorphic surface every backend
//! implements: the in-process [`local::AsyncLocalOrchestrator`] (FIFO queue
//! plus worker pool) and the [`remote::AsyncKfpOrchestrator`] (external
//! workflow engine with HTTP progress callbacks). Shared task and subscriber
//! state lives in [`registry::TaskRegistry`].

pub mod local;
pub mod registry;
pub mod remote;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{AppConfig, DoclingServeSettings, EngineKind};
use crate::convert::cache::ConverterCache;
use crate::convert::engine::EngineError;
use crate::datamodel::callback::ProgressCallbackRequest;
use crate::datamodel::convert::ConvertDocumentsOptions;
use crate::datamodel::requests::TaskSource;
use crate::datamodel::responses::WebsocketMessage;
use crate::datamodel::task::{Task, TaskResult};
use crate::storage::ScratchStore;
use registry::{SubscriberId, TaskRegistry};

/// How often completion polls re-check the registry.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Errors raised by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("task not found")]
    TaskNotFound,

    /// Progress callback rejected, e.g. counters before `set_num_docs` or an
    /// ambiguous run-name resolution.
    #[error("invalid progress update: {0}")]
    ProgressInvalid(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Workflow-engine API failure (remote backend).
    #[error("workflow engine error: {0}")]
    Remote(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// The common orchestration surface. All operations are cancellable at the
/// next await point.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Shared task and subscriber state.
    fn registry(&self) -> &Arc<TaskRegistry>;

    /// Service settings the orchestrator was built with.
    fn settings(&self) -> &DoclingServeSettings;

    /// Accept a submission: create a task in PENDING and queue it.
    async fn enqueue(
        &self,
        sources: Vec<TaskSource>,
        options: ConvertDocumentsOptions,
    ) -> Result<Task>;

    /// Number of tasks waiting for a worker.
    async fn queue_size(&self) -> Result<usize>;

    /// 1-based position of a pending task, or `None` once dequeued.
    async fn get_queue_position(&self, task_id: &str) -> Result<Option<usize>>;

    /// Snapshot of a task, long-polling up to `wait` seconds for completion.
    async fn task_status(&self, task_id: &str, wait: f64) -> Result<Task> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(wait.max(0.0));
        loop {
            let task = self.registry().get(task_id)?;
            if task.is_completed() || tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Result of a completed task, or `None` while it is still running.
    ///
    /// Under single-use results, the first read of a completed task arms the
    /// deletion timer: after `result_removal_delay` seconds the task, its
    /// subscribers, and its scratch directory are removed. The delay lets
    /// clients retry the download briefly after the first read.
    async fn task_result(&self, task_id: &str) -> Result<Option<TaskResult>> {
        let task = self.registry().get(task_id)?;
        if task.is_completed() && self.settings().single_use_results {
            self.registry().schedule_deletion(
                task_id,
                Duration::from_secs_f64(self.settings().result_removal_delay),
            );
        }
        Ok(task.result)
    }

    /// Delete a task, closing its subscribers and removing its scratch dir.
    async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.registry().delete(task_id);
        Ok(())
    }

    /// Delete every completed task older than `older_than` seconds.
    async fn clear_results(&self, older_than: f64) -> Result<()> {
        self.registry().clear_results(older_than);
        Ok(())
    }

    /// Attach a push channel to a task.
    async fn subscribe(
        &self,
        task_id: &str,
        channel: mpsc::Sender<WebsocketMessage>,
    ) -> Result<SubscriberId> {
        self.registry().subscribe(task_id, channel)
    }

    /// Detach a push channel, e.g. on client disconnect.
    async fn unsubscribe(&self, task_id: &str, subscriber: SubscriberId) {
        self.registry().unsubscribe(task_id, subscriber);
    }

    /// Push the current task snapshot to every subscriber of the task.
    async fn notify_task_subscribers(&self, task_id: &str) -> Result<()> {
        let position = self.get_queue_position(task_id).await?;
        self.registry().notify(task_id, position)
    }

    /// Push fresh queue positions to the subscribers of all PENDING tasks.
    async fn notify_queue_positions(&self) -> Result<()> {
        for task_id in self.registry().pending_subscribed_tasks() {
            self.notify_task_subscribers(&task_id).await?;
        }
        Ok(())
    }

    /// Apply a progress callback from the execution backend.
    async fn receive_task_progress(&self, request: ProgressCallbackRequest) -> Result<()>;

    /// Run the queue until cancelled. Backends without an in-process queue
    /// return immediately.
    async fn process_queue(&self) -> Result<()>;

    /// Pre-build the default converter so the first request is fast.
    async fn warm_up_caches(&self) -> Result<()>;
}

/// Build the orchestrator selected by `eng_kind`. The converter cache is
/// shared with the HTTP surface so `clear/converters` can evict it.
pub fn create_orchestrator(
    config: &AppConfig,
    scratch: Arc<ScratchStore>,
    converter_cache: Arc<ConverterCache>,
) -> anyhow::Result<Arc<dyn Orchestrator>> {
    match config.settings.eng_kind {
        EngineKind::Local => Ok(Arc::new(local::AsyncLocalOrchestrator::new(
            config.settings.clone(),
            scratch,
            converter_cache,
        ))),
        EngineKind::Kfp => Ok(Arc::new(remote::AsyncKfpOrchestrator::new(
            config.settings.clone(),
        )?)),
    }
}
