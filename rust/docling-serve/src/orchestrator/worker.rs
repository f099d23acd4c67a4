//! Worker loop of the local orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::convert::engine::EngineSource;
use crate::convert::{prepare_limits, prepare_pipeline};
use crate::datamodel::requests::TaskSource;
use crate::datamodel::task::{TaskResult, TaskStatus};
use crate::orchestrator::local::AsyncLocalOrchestrator;
use crate::orchestrator::{Orchestrator, OrchestratorError, Result};
use crate::response::process_results;

/// One worker of the pool. Dequeues task ids and runs the blocking
/// conversion on the blocking thread pool.
pub(crate) struct AsyncLocalWorker<'a> {
    worker_id: usize,
    orchestrator: &'a AsyncLocalOrchestrator,
}

impl<'a> AsyncLocalWorker<'a> {
    pub(crate) fn new(worker_id: usize, orchestrator: &'a AsyncLocalOrchestrator) -> Self {
        Self {
            worker_id,
            orchestrator,
        }
    }

    pub(crate) async fn run(&self) {
        tracing::debug!(worker_id = self.worker_id, "Starting worker loop");
        loop {
            let task_id = {
                let mut queue = self.orchestrator.queue_rx.lock().await;
                queue.recv().await
            };
            let Some(task_id) = task_id else {
                // Queue closed: the orchestrator is shutting down.
                break;
            };

            // Dequeued: the task leaves the visible ordering.
            self.orchestrator
                .queue_list
                .lock()
                .retain(|id| id != &task_id);

            if !self.orchestrator.registry().contains(&task_id) {
                tracing::error!(
                    worker_id = self.worker_id,
                    task_id,
                    "Dequeued task is missing from the registry"
                );
                continue;
            }

            if let Err(err) = self.process(&task_id).await {
                tracing::error!(
                    worker_id = self.worker_id,
                    task_id,
                    error = %err,
                    "Worker failed to process job"
                );
                let _ = self
                    .orchestrator
                    .registry()
                    .set_status(&task_id, TaskStatus::Failure);
            }

            let _ = self.orchestrator.notify_task_subscribers(&task_id).await;
            tracing::debug!(
                worker_id = self.worker_id,
                task_id,
                "Worker completely done with task"
            );
        }
    }

    async fn process(&self, task_id: &str) -> Result<()> {
        let registry = self.orchestrator.registry();
        registry.set_status(task_id, TaskStatus::Started)?;
        tracing::info!(worker_id = self.worker_id, task_id, "Worker processing task");

        // Tell this task's subscribers, then everyone still pending about
        // their new positions.
        self.orchestrator.notify_task_subscribers(task_id).await?;
        self.orchestrator.notify_queue_positions().await?;

        let task = registry.get(task_id)?;
        let options = task.options.clone().unwrap_or_default();
        let (sources, headers) = compose_sources(&task.sources)?;

        let settings = self.orchestrator.settings();
        let spec = prepare_pipeline(&options, settings);
        let limits = prepare_limits(&options, settings);
        let cache = Arc::clone(&self.orchestrator.converter_cache);
        let work_dir = self.orchestrator.scratch.task_path(task_id);

        let start = Instant::now();
        let blocking_work_dir = work_dir.clone();
        let assembled = tokio::task::spawn_blocking(move || -> Result<TaskResult> {
            let converter = cache.get_or_build(&spec)?;
            let results = converter.convert_all(&sources, headers.as_ref(), &limits);
            let processing_time = start.elapsed().as_secs_f64();
            process_results(&options, results, processing_time, &blocking_work_dir)
                .map_err(|err| OrchestratorError::Internal(err.to_string()))
        })
        .await
        .map_err(|err| OrchestratorError::Internal(format!("conversion thread failed: {err}")))??;

        let scratch_dir = matches!(assembled, TaskResult::File(_)).then_some(work_dir);
        registry.complete_success(task_id, assembled, scratch_dir)?;

        tracing::info!(
            worker_id = self.worker_id,
            task_id,
            "Worker completed job in {:.2} seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

/// Flatten task sources into engine inputs. File sources become in-memory
/// streams; the first non-empty header map of the batch is used for every
/// HTTP fetch.
fn compose_sources(
    task_sources: &[TaskSource],
) -> Result<(Vec<EngineSource>, Option<HashMap<String, String>>)> {
    let mut sources = Vec::with_capacity(task_sources.len());
    let mut headers: Option<HashMap<String, String>> = None;

    for source in task_sources {
        match source {
            TaskSource::Http(http) => {
                sources.push(EngineSource::Url {
                    url: http.url.to_string(),
                });
                if headers.is_none() && !http.headers.is_empty() {
                    headers = Some(http.headers.clone());
                }
            }
            TaskSource::File(file) => {
                let stream = file.to_document_stream().map_err(|err| {
                    OrchestratorError::Internal(format!(
                        "invalid base64 payload for {}: {err}",
                        file.filename
                    ))
                })?;
                sources.push(EngineSource::Stream {
                    name: stream.name,
                    data: stream.stream,
                });
            }
            TaskSource::Stream(stream) => {
                sources.push(EngineSource::Stream {
                    name: stream.name.clone(),
                    data: stream.stream.clone(),
                });
            }
        }
    }

    Ok((sources, headers))
}
