//! Bounded executor for detached background work

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Runs fire-and-forget tasks with a concurrency bound
///
/// Every task is tracked so the owner can wait for in-flight work before
/// tearing down the providers it touches.
pub struct BackgroundWorker {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    accepting: AtomicBool,
    drain_lock: Mutex<()>,
}

impl BackgroundWorker {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            accepting: AtomicBool::new(true),
            drain_lock: Mutex::new(()),
        }
    }

    /// Queue a task. Returns false if the worker is shut down or there is
    /// no runtime to run it on.
    pub fn spawn<F>(&self, label: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            debug!("Background worker shut down, dropping task '{}'", label);
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, dropping task '{}'", label);
            return false;
        };

        let permits = self.permits.clone();
        self.tracker.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                task.await;
            },
            &handle,
        );
        true
    }

    /// Number of queued or running tasks
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Wait for every task queued so far. New tasks are still accepted.
    pub async fn drain(&self) {
        let _guard = self.drain_lock.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        if self.is_accepting() {
            self.tracker.reopen();
        }
    }

    /// Stop accepting tasks and wait for the in-flight ones
    pub async fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!(
                "Shutting down background worker ({} tasks in flight)",
                self.in_flight()
            );
        }
        let _guard = self.drain_lock.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
    }
}
