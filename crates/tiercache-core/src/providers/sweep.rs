//! Periodic background sweeps owned by a provider

use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Spawn a task that runs `job` every `period` while `target` is alive.
///
/// The task only holds a weak reference, so dropping the provider ends it
/// on the next tick. Returns `None` when `period` is zero or when called
/// outside a tokio runtime.
pub fn spawn_sweep_task<T, F, Fut>(
    target: Weak<T>,
    name: &'static str,
    period: Duration,
    job: F,
) -> Option<JoinHandle<()>>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    if period.is_zero() {
        debug!("Sweep '{}' disabled", name);
        return None;
    }
    let handle = tokio::runtime::Handle::try_current().ok()?;

    info!("Starting background sweep '{}' (interval: {:?})", name, period);

    Some(handle.spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(target) = target.upgrade() else {
                debug!("Sweep '{}' stopping, owner dropped", name);
                break;
            };
            job(target).await;
        }
    }))
}

/// Handles of the sweeps started by one provider
#[derive(Default)]
pub struct SweepHandle {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SweepHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: Option<JoinHandle<()>>) {
        if let Some(task) = task {
            self.tasks.lock().push(task);
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every sweep. Idempotent.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_sweep_runs_until_owner_dropped() {
        let counter = Arc::new(AtomicU32::new(0));
        let task = spawn_sweep_task(
            Arc::downgrade(&counter),
            "test",
            Duration::from_millis(20),
            |counter| async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(counter.load(Ordering::SeqCst) >= 2);

        drop(counter);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_period_disabled() {
        let owner = Arc::new(());
        let task = spawn_sweep_task(Arc::downgrade(&owner), "off", Duration::ZERO, |_| async {});
        assert!(task.is_none());
    }

    #[tokio::test]
    async fn test_stop_aborts_tasks() {
        let owner = Arc::new(());
        let sweeps = SweepHandle::new();
        sweeps.push(spawn_sweep_task(
            Arc::downgrade(&owner),
            "abort",
            Duration::from_secs(3600),
            |_| async {},
        ));
        assert_eq!(sweeps.len(), 1);

        sweeps.stop();
        assert!(sweeps.is_empty());
        sweeps.stop();
    }

    #[test]
    fn test_no_runtime_returns_none() {
        let owner = Arc::new(());
        let task = spawn_sweep_task(
            Arc::downgrade(&owner),
            "no-runtime",
            Duration::from_secs(1),
            |_| async {},
        );
        assert!(task.is_none());
    }
}
