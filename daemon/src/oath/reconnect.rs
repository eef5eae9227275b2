//! Reconnect coordinator (component J, §4.6): single-consumer state machine
//! invoked only by the manager, only from its own task.

use crate::oath::model::{DeviceId, ReaderName};
use crate::prelude::*;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Outcome of one reconnect attempt, delivered via `reconnectCompleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectOutcome {
    pub success: bool,
}

type ReconnectFuture = Pin<Box<dyn Future<Output = Result<(), ()>> + Send>>;

/// Caller-supplied reconnect closure: `(reader_name) -> Result<(), ()>`.
pub type ReconnectFn = Arc<dyn Fn(ReaderName) -> ReconnectFuture + Send + Sync>;

#[derive(Clone)]
struct PendingReconnect {
    device_id: DeviceId,
    reader_name: ReaderName,
    generation: u64,
}

/// The coordinator itself. `on_started`/`on_completed` are the
/// `reconnectStarted`/`reconnectCompleted` signal callbacks.
pub struct ReconnectCoordinator {
    state: Arc<Mutex<Option<PendingReconnect>>>,
    generation: Arc<std::sync::atomic::AtomicU64>,
    reconnect_fn: Arc<Mutex<Option<ReconnectFn>>>,
    initial_delay_ms: u64,
    current_timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    on_started: Arc<dyn Fn(DeviceId) + Send + Sync>,
    on_completed: Arc<dyn Fn(DeviceId, bool) + Send + Sync>,
}

impl ReconnectCoordinator {
    pub fn new(
        initial_delay_ms: u64,
        on_started: impl Fn(DeviceId) + Send + Sync + 'static,
        on_completed: impl Fn(DeviceId, bool) + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
            generation: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            reconnect_fn: Arc::new(Mutex::new(None)),
            initial_delay_ms,
            current_timer: Arc::new(Mutex::new(None)),
            on_started: Arc::new(on_started),
            on_completed: Arc::new(on_completed),
        }
    }

    pub async fn set_reconnect_fn(&self, f: ReconnectFn) {
        *self.reconnect_fn.lock().await = Some(f);
    }

    /// Starts (or replaces) a pending reconnect. Replacing a Waiting attempt
    /// emits no completion for the one it displaces.
    pub async fn start_reconnect(&self, device_id: DeviceId, reader_name: ReaderName) {
        let generation = self.generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        {
            let mut state = self.state.lock().await;
            *state = Some(PendingReconnect { device_id: device_id.clone(), reader_name: reader_name.clone(), generation });
        }
        if let Some(old_timer) = self.current_timer.lock().await.take() {
            old_timer.abort();
        }

        (self.on_started)(device_id.clone());

        let state = self.state.clone();
        let reconnect_fn = self.reconnect_fn.clone();
        let on_completed = self.on_completed.clone();
        let delay = self.initial_delay_ms;
        let current_timer = self.current_timer.clone();
        let generation_counter = self.generation.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;

            // If a newer start_reconnect or a cancel ran while we slept, this
            // attempt is stale: emit nothing.
            let still_current = {
                let guard = state.lock().await;
                matches!(&*guard, Some(pending) if pending.generation == generation)
            };
            if !still_current {
                return;
            }

            let f = reconnect_fn.lock().await.clone();
            let success = match f {
                Some(f) => (f)(reader_name).await.is_ok(),
                None => false,
            };

            let mut guard = state.lock().await;
            let still_current = matches!(&*guard, Some(pending) if pending.generation == generation);
            if still_current {
                *guard = None;
            }
            drop(guard);

            if still_current {
                let _ = generation_counter;
                (on_completed)(device_id, success);
            }
            *current_timer.lock().await = None;
        });

        *self.current_timer.lock().await = Some(handle);
    }

    /// Clears state and the timer; no completion is emitted for a cancelled
    /// attempt.
    pub async fn cancel(&self) {
        self.generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        *self.state.lock().await = None;
        if let Some(timer) = self.current_timer.lock().await.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn reconnect_invokes_closure_once_after_delay() {
        let started = Arc::new(AtomicU32::new(0));
        let completed = Arc::new(AtomicU32::new(0));
        let started_clone = started.clone();
        let completed_clone = completed.clone();

        let coordinator = ReconnectCoordinator::new(
            10,
            move |_id| { started_clone.fetch_add(1, Ordering::SeqCst); },
            move |_id, _success| { completed_clone.fetch_add(1, Ordering::SeqCst); },
        );

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        coordinator
            .set_reconnect_fn(Arc::new(move |_reader| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }))
            .await;

        coordinator
            .start_reconnect(DeviceId("dev1".to_string()), ReaderName("Reader 0".to_string()))
            .await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_before_timer_emits_no_completion() {
        let completed = Arc::new(AtomicU32::new(0));
        let completed_clone = completed.clone();
        let coordinator = ReconnectCoordinator::new(50, |_id| {}, move |_id, _s| {
            completed_clone.fetch_add(1, Ordering::SeqCst);
        });
        coordinator
            .start_reconnect(DeviceId("dev1".to_string()), ReaderName("Reader 0".to_string()))
            .await;
        coordinator.cancel().await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }
}
