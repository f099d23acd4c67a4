//! Shared in-memory task and subscriber state.
//!
//! The registry is the sole source of truth for task records. All mutations
//! take short synchronous locks; subscriber sends are best-effort so a slow
//! subscriber never blocks another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::datamodel::responses::{TaskStatusResponse, WebsocketMessage};
use crate::datamodel::task::{Task, TaskResult, TaskStatus};
use crate::orchestrator::{OrchestratorError, Result};

/// Identifies one push channel attached to a task.
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    channel: mpsc::Sender<WebsocketMessage>,
}

/// In-memory registry of tasks, their subscribers, and deletion timers.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Task>>,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    deletion_timers: Mutex<HashMap<String, JoinHandle<()>>>,
    next_subscriber_id: AtomicU64,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            deletion_timers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Start tracking a task and create its (empty) subscriber list.
    pub fn insert(&self, task: Task) {
        let task_id = task.task_id.clone();
        self.tasks.lock().insert(task_id.clone(), task);
        self.subscribers.lock().entry(task_id).or_default();
    }

    /// Snapshot of a task.
    pub fn get(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .lock()
            .get(task_id)
            .cloned()
            .ok_or(OrchestratorError::TaskNotFound)
    }

    #[must_use]
    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.lock().contains_key(task_id)
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Mutate a task in place.
    pub fn update<R>(&self, task_id: &str, f: impl FnOnce(&mut Task) -> R) -> Result<R> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(task_id)
            .ok_or(OrchestratorError::TaskNotFound)?;
        Ok(f(task))
    }

    /// Transition a task's status.
    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.update(task_id, |task| task.set_status(status))
    }

    /// Record a successful conversion: store the result, remember the scratch
    /// dir for file responses, release sources and options, mark SUCCESS.
    pub fn complete_success(
        &self,
        task_id: &str,
        result: TaskResult,
        scratch_dir: Option<std::path::PathBuf>,
    ) -> Result<()> {
        self.update(task_id, |task| {
            task.result = Some(result);
            task.scratch_dir = scratch_dir;
            task.sources.clear();
            task.options = None;
            task.set_status(TaskStatus::Success);
        })
    }

    /// Attach a push channel to a task.
    pub fn subscribe(
        &self,
        task_id: &str,
        channel: mpsc::Sender<WebsocketMessage>,
    ) -> Result<SubscriberId> {
        if !self.contains(task_id) {
            return Err(OrchestratorError::TaskNotFound);
        }
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .entry(task_id.to_string())
            .or_default()
            .push(Subscriber { id, channel });
        Ok(id)
    }

    /// Detach one push channel.
    pub fn unsubscribe(&self, task_id: &str, subscriber: SubscriberId) {
        if let Some(subs) = self.subscribers.lock().get_mut(task_id) {
            subs.retain(|s| s.id != subscriber);
        }
    }

    /// Send the current snapshot to every subscriber of a task. Sends are
    /// best-effort; once the task is completed the subscribers are dropped
    /// after the final message, which closes their channels.
    pub fn notify(&self, task_id: &str, position: Option<usize>) -> Result<()> {
        let task = self.get(task_id)?;
        let msg = WebsocketMessage::update(TaskStatusResponse {
            task_id: task.task_id.clone(),
            task_status: task.task_status,
            task_position: position,
            task_meta: task.processing_meta.clone(),
        });

        let mut subscribers = self.subscribers.lock();
        let Some(subs) = subscribers.get_mut(task_id) else {
            return Ok(());
        };
        for sub in subs.iter() {
            if sub.channel.try_send(msg.clone()).is_err() {
                tracing::debug!(task_id, subscriber = sub.id, "Dropped subscriber update");
            }
        }
        if task.is_completed() {
            subs.clear();
        }
        Ok(())
    }

    /// Tasks that are PENDING and have at least one subscriber.
    #[must_use]
    pub fn pending_subscribed_tasks(&self) -> Vec<String> {
        let subscribers = self.subscribers.lock();
        let tasks = self.tasks.lock();
        subscribers
            .iter()
            .filter(|(_, subs)| !subs.is_empty())
            .filter_map(|(task_id, _)| {
                tasks
                    .get(task_id)
                    .filter(|task| task.task_status == TaskStatus::Pending)
                    .map(|task| task.task_id.clone())
            })
            .collect()
    }

    /// Arm the single-use deletion timer for a task. Only the first call
    /// arms it; later reads within the delay window are no-ops.
    pub fn schedule_deletion(self: &Arc<Self>, task_id: &str, delay: Duration) {
        let mut timers = self.deletion_timers.lock();
        if timers.contains_key(task_id) {
            return;
        }
        tracing::info!(task_id, delay_secs = delay.as_secs_f64(), "Scheduling task deletion");
        let registry = Arc::clone(self);
        let id = task_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.delete(&id);
        });
        timers.insert(task_id.to_string(), handle);
    }

    /// Delete a task: close subscribers first, then drop the record, cancel
    /// its timer, and remove its scratch directory. Atomic per id — a reader
    /// that raced the close observes a normal completion and then
    /// TaskNotFound on the next lookup.
    pub fn delete(&self, task_id: &str) {
        tracing::info!(task_id, "Deleting task");
        self.subscribers.lock().remove(task_id);
        let scratch_dir = self
            .tasks
            .lock()
            .remove(task_id)
            .and_then(|task| task.scratch_dir);
        if let Some(handle) = self.deletion_timers.lock().remove(task_id) {
            handle.abort();
        }
        if let Some(dir) = scratch_dir {
            if let Err(err) = std::fs::remove_dir_all(&dir) {
                tracing::warn!(task_id, dir = %dir.display(), error = %err, "Failed to remove scratch dir");
            }
        }
    }

    /// Delete every task whose `finished_at` is older than `older_than`
    /// seconds. Best effort across concurrent callers; deletion stays atomic
    /// per id.
    pub fn clear_results(&self, older_than: f64) {
        let cutoff = Utc::now() - chrono::Duration::milliseconds((older_than * 1000.0) as i64);
        let expired: Vec<String> = self
            .tasks
            .lock()
            .iter()
            .filter(|(_, task)| matches!(task.finished_at, Some(at) if at < cutoff))
            .map(|(task_id, _)| task_id.clone())
            .collect();
        for task_id in expired {
            self.delete(&task_id);
        }
    }
}
