//! The in-process orchestrator: FIFO queue plus a bounded worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::DoclingServeSettings;
use crate::convert::cache::ConverterCache;
use crate::convert::prepare_pipeline;
use crate::datamodel::callback::ProgressCallbackRequest;
use crate::datamodel::convert::ConvertDocumentsOptions;
use crate::datamodel::requests::TaskSource;
use crate::datamodel::task::Task;
use crate::orchestrator::registry::TaskRegistry;
use crate::orchestrator::worker::AsyncLocalWorker;
use crate::orchestrator::{Orchestrator, OrchestratorError, Result};
use crate::storage::ScratchStore;

/// Default orchestrator backend: an unbounded FIFO consumed by
/// `eng_loc_num_workers` workers that run the conversion off the request
/// path.
pub struct AsyncLocalOrchestrator {
    registry: Arc<TaskRegistry>,
    settings: DoclingServeSettings,
    pub(crate) scratch: Arc<ScratchStore>,
    pub(crate) converter_cache: Arc<ConverterCache>,
    queue_tx: mpsc::UnboundedSender<String>,
    pub(crate) queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    /// Mirror of the queue in enqueue order, for O(index) position queries.
    pub(crate) queue_list: Mutex<Vec<String>>,
}

impl std::fmt::Debug for AsyncLocalOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncLocalOrchestrator")
            .field("queued", &self.queue_list.lock().len())
            .field("workers", &self.settings.eng_loc_num_workers)
            .finish()
    }
}

impl AsyncLocalOrchestrator {
    #[must_use]
    pub fn new(
        settings: DoclingServeSettings,
        scratch: Arc<ScratchStore>,
        converter_cache: Arc<ConverterCache>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            registry: Arc::new(TaskRegistry::new()),
            settings,
            scratch,
            converter_cache,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            queue_list: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Orchestrator for AsyncLocalOrchestrator {
    fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    fn settings(&self) -> &DoclingServeSettings {
        &self.settings
    }

    async fn enqueue(
        &self,
        sources: Vec<TaskSource>,
        options: ConvertDocumentsOptions,
    ) -> Result<Task> {
        let task_id = Uuid::new_v4().to_string();
        let task = Task::new(task_id.clone(), sources, options);
        self.registry.insert(task.clone());
        self.queue_list.lock().push(task_id.clone());
        self.queue_tx
            .send(task_id.clone())
            .map_err(|_| OrchestratorError::Internal("task queue is closed".to_string()))?;
        tracing::info!(task_id, "Task enqueued");
        Ok(task)
    }

    async fn queue_size(&self) -> Result<usize> {
        Ok(self.queue_list.lock().len())
    }

    async fn get_queue_position(&self, task_id: &str) -> Result<Option<usize>> {
        Ok(self
            .queue_list
            .lock()
            .iter()
            .position(|id| id == task_id)
            .map(|index| index + 1))
    }

    async fn receive_task_progress(&self, _request: ProgressCallbackRequest) -> Result<()> {
        Err(OrchestratorError::ProgressInvalid(
            "progress callbacks are not supported by the local engine".to_string(),
        ))
    }

    async fn process_queue(&self) -> Result<()> {
        let workers: Vec<_> = (0..self.settings.eng_loc_num_workers)
            .map(|worker_id| {
                tracing::debug!(worker_id, "Starting worker");
                let worker = AsyncLocalWorker::new(worker_id, self);
                async move { worker.run().await }
            })
            .collect();

        // Workers run until the queue closes or the surrounding task is
        // cancelled at shutdown; in-flight conversions are never interrupted.
        join_all(workers).await;
        tracing::debug!("All workers completed");
        Ok(())
    }

    async fn warm_up_caches(&self) -> Result<()> {
        let cache = Arc::clone(&self.converter_cache);
        let spec = prepare_pipeline(&ConvertDocumentsOptions::default(), &self.settings);
        tokio::task::spawn_blocking(move || cache.get_or_build(&spec))
            .await
            .map_err(|err| OrchestratorError::Internal(err.to_string()))??;
        tracing::info!("Default converter warmed up");
        Ok(())
    }
}
