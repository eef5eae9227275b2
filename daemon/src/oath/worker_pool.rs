//! Process-wide worker pool (component K, §4.10).
//!
//! Rate limiting is deliberately absent here — it belongs to the session
//! layer (§4.7) so a task is never delayed twice.

use crate::oath::model::DeviceId;
use crate::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Dequeue priority; higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Background = 0,
    Normal = 10,
    UserInteraction = 20,
}

type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

struct QueuedTask {
    priority: TaskPriority,
    sequence: u64,
    device_id: DeviceId,
    task: BoxedTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority first, and among equal
        // priorities, the task queued earlier (lower sequence) first.
        self.priority.cmp(&other.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Bounded-concurrency task executor tagged with per-task priority.
/// `device_id` is used only for logging and carries no scheduling weight of
/// its own, matching the source's "legacy clear-history no-op" note.
pub struct WorkerPool {
    queue: Arc<Mutex<BinaryHeap<QueuedTask>>>,
    notify: Arc<Notify>,
    sequence: AtomicU64,
    inflight: Arc<tokio::sync::Semaphore>,
    shutdown: Arc<Notify>,
    active_tasks: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(max_threads: usize) -> Self {
        let pool = Self {
            queue: Arc::new(Mutex::new(BinaryHeap::new())),
            notify: Arc::new(Notify::new()),
            sequence: AtomicU64::new(0),
            inflight: Arc::new(tokio::sync::Semaphore::new(max_threads.max(1))),
            shutdown: Arc::new(Notify::new()),
            active_tasks: Arc::new(AtomicU64::new(0)),
        };
        pool.spawn_dispatcher();
        pool
    }

    fn spawn_dispatcher(&self) {
        let queue = self.queue.clone();
        let notify = self.notify.clone();
        let inflight = self.inflight.clone();
        let active_tasks = self.active_tasks.clone();
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut guard = queue.lock().await;
                    guard.pop()
                };
                let Some(queued) = next else {
                    notify.notified().await;
                    continue;
                };
                let permit = inflight.clone().acquire_owned().await.expect("semaphore closed");
                active_tasks.fetch_add(1, AtomicOrdering::SeqCst);
                let device_id = queued.device_id.clone();
                let active_tasks = active_tasks.clone();
                tokio::task::spawn_blocking(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(queued.task));
                    if result.is_err() {
                        error!(device_id = %device_id, "worker task panicked");
                    }
                    drop(permit);
                    active_tasks.fetch_sub(1, AtomicOrdering::SeqCst);
                });
            }
        });
    }

    /// Enqueues a task tagged with a device id (for logging) and priority.
    pub fn submit(&self, device_id: DeviceId, priority: TaskPriority, task: impl FnOnce() + Send + 'static) {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);
        let queued = QueuedTask { priority, sequence, device_id, task: Box::new(task) };
        let queue = self.queue.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            queue.lock().await.push(queued);
            notify.notify_one();
        });
    }

    /// Blocks (polling) up to `timeout_ms` for in-flight tasks to finish.
    pub async fn wait_for_done(&self, timeout_ms: u64) {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        while self.active_tasks.load(AtomicOrdering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!("worker pool wait_for_done timed out with tasks still in flight");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn submitted_task_runs() {
        let pool = WorkerPool::new(2);
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        pool.submit(DeviceId("test".to_string()), TaskPriority::Normal, move || {
            ran_clone.store(true, AtomicOrdering::SeqCst);
        });
        pool.wait_for_done(1000).await;
        assert!(ran.load(AtomicOrdering::SeqCst));
    }
}
