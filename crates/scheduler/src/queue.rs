//! Admission-controlled task scheduler.
//!
//! A polling tick admits at most one pending task while fewer than `limit`
//! tasks run. Each admitted task gets a timeout watchdog. The watchdog marks
//! the task timed out and frees its slot but does not abort the work; a
//! result arriving afterwards is ignored.

use futures::future::BoxFuture;
use std::future::Future;
use mjlink_core::config::TasksConfig;
use mjlink_core::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::delivery::TaskDelivery;
use crate::task::{SubmitAck, Task, TaskEvent, TaskStatus, TaskSubmission};

/// Unit of work for one task. Receives a handle for progress reports.
pub type TaskWork = Box<dyn FnOnce(TaskProgress) -> BoxFuture<'static, Result<Value>> + Send>;

pub fn task_work<F, Fut>(work: F) -> TaskWork
where
    F: FnOnce(TaskProgress) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Box::new(move |progress| Box::pin(work(progress)))
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl QueueSettings {
    pub fn from_config(config: &TasksConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&TasksConfig::default())
    }
}

struct Entry {
    /// Queue-internal identity. Results are settled by key so that a task
    /// removed and resubmitted under the same id cannot receive them.
    key: u64,
    task: Task,
    work: Option<TaskWork>,
    admitted: bool,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<Entry>,
    running: usize,
    next_key: u64,
}

struct Inner {
    settings: QueueSettings,
    delivery: Arc<dyn TaskDelivery>,
    state: Mutex<QueueState>,
}

#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

/// Progress handle passed to a task's work.
#[derive(Clone)]
pub struct TaskProgress {
    key: u64,
    id: String,
    queue: TaskQueue,
}

impl TaskProgress {
    pub fn task_id(&self) -> &str {
        &self.id
    }

    pub fn report(&self, msg: Value) {
        let mut state = self.queue.inner.state.lock();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.key == self.key) {
            entry.task.processing(msg);
        }
    }
}

impl TaskQueue {
    /// `delivery` is used for tasks created through [`TaskQueue::submit_request`].
    pub fn new(settings: QueueSettings, delivery: Arc<dyn TaskDelivery>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                delivery,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    /// Queue `task` as pending. Returns its id, which is replaced by a fresh
    /// one when another queued task already holds it.
    pub fn submit(&self, mut task: Task, work: TaskWork) -> String {
        let mut state = self.inner.state.lock();
        if state.entries.iter().any(|e| e.task.id() == task.id()) {
            let fresh = uuid::Uuid::new_v4().to_string();
            warn!(task_id = %task.id(), new_id = %fresh, "Task id already queued, assigning a new one");
            task.reassign_id(fresh);
        }
        task.submit();
        let id = task.id().to_string();
        info!(task_id = %id, "Task submitted");
        let key = state.next_key;
        state.next_key += 1;
        state.entries.push(Entry {
            key,
            task,
            work: Some(work),
            admitted: false,
        });
        id
    }

    pub fn submit_request(&self, submission: TaskSubmission, work: TaskWork) -> SubmitAck {
        let task = Task::new(submission, self.inner.delivery.clone());
        SubmitAck::ok(self.submit(task, work))
    }

    /// One scheduling pass. Returns the number of tasks admitted (0 or 1).
    pub fn tick(&self) -> usize {
        let (key, id, work) = {
            let mut state = self.inner.state.lock();
            if state.running >= self.inner.settings.concurrency {
                return 0;
            }
            let Some(entry) = state
                .entries
                .iter_mut()
                .find(|e| e.task.status() == TaskStatus::Pending)
            else {
                return 0;
            };
            let Some(work) = entry.work.take() else {
                return 0;
            };
            entry.task.start();
            entry.admitted = true;
            let id = entry.task.id().to_string();
            let key = entry.key;
            state.running += 1;
            (key, id, work)
        };
        debug!(task_id = %id, "Task admitted");
        self.execute(key, id, work);
        1
    }

    fn execute(&self, key: u64, id: String, work: TaskWork) {
        let queue = self.clone();
        let timeout = self.inner.settings.timeout;
        tokio::spawn(async move {
            let progress = TaskProgress {
                key,
                id: id.clone(),
                queue: queue.clone(),
            };
            let mut running = tokio::spawn(work(progress));

            let outcome = tokio::select! {
                joined = &mut running => joined,
                _ = tokio::time::sleep(timeout) => {
                    warn!(task_id = %id, timeout_secs = timeout.as_secs(), "Task timed out");
                    let reason = Error::TaskTimeout(format!("{} after {}s", id, timeout.as_secs()));
                    let msg = Value::String(reason.to_string());
                    queue.settle(key, |task| task.expire(msg));
                    running.await
                }
            };

            match outcome {
                Ok(Ok(msg)) => queue.settle(key, |task| task.success(msg)),
                Ok(Err(e)) => {
                    warn!(task_id = %id, error = %e, "Task failed");
                    queue.settle(key, |task| task.fail(Value::String(e.to_string())));
                }
                Err(e) => {
                    error!(task_id = %id, error = %e, "Task work panicked");
                    queue.settle(key, |task| task.fail(Value::String(e.to_string())));
                }
            }
        });
    }

    /// Apply a terminal transition. A task that reached a terminal state is
    /// removed and its slot released.
    fn settle(&self, key: u64, transition: impl FnOnce(&mut Task) -> bool) {
        let mut state = self.inner.state.lock();
        let Some(index) = state.entries.iter().position(|e| e.key == key) else {
            debug!(key, "Result for removed task ignored");
            return;
        };
        if transition(&mut state.entries[index].task) {
            let entry = state.entries.remove(index);
            if entry.admitted {
                state.running -= 1;
            }
            debug!(task_id = %entry.task.id(), status = %entry.task.status(), "Task finished");
        }
    }

    /// Drop a task from the queue. Frees its slot if it was running; the
    /// work itself keeps going and its result is ignored.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let Some(index) = state.entries.iter().position(|e| e.task.id() == id) else {
            return false;
        };
        let entry = state.entries.remove(index);
        if entry.admitted {
            state.running -= 1;
        }
        true
    }

    pub fn cancel(&self, id: &str) -> bool {
        let removed = self.remove(id);
        if removed {
            info!(task_id = %id, "Task cancelled");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<TaskEvent> {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .find(|e| e.task.id() == id)
            .map(|e| e.task.event())
    }

    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn run_loop(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            concurrency = self.inner.settings.concurrency,
            poll_secs = self.inner.settings.poll_interval.as_secs(),
            "TaskQueue started"
        );
        let mut interval = tokio::time::interval(self.inner.settings.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = shutdown.recv() => {
                    info!("TaskQueue shutting down");
                    break;
                }
            }
        }
    }
}
