//! Shutdown coordination: one token to signal, one tracker to wait on.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Owns the hub's cancellation token and every per-connection task.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    /// Cancelled once the grace period runs out; tracked tasks are dropped.
    abort: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task that shutdown will wait for. Yields `None` if the task
    /// was still running when the grace period ran out.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let abort = self.abort.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                out = task => Some(out),
                () = abort.cancelled() => None,
            }
        })
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of tracked tasks still running.
    pub fn live_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting tasks and wait up to `grace` for the tracked ones.
    ///
    /// Returns `false` if the grace period ran out; stragglers are then
    /// dropped, which releases whatever transport they held.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.shutdown();
        let _ = self.tracker.close();
        info!(tasks = self.tracker.len(), grace_ms = grace.as_millis() as u64, "draining tasks");

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            return true;
        }
        warn!(stragglers = self.tracker.len(), "shutdown grace period elapsed, aborting");
        self.abort.cancel();
        self.tracker.wait().await;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_cooperative_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let _ = coord.spawn(async move { token.cancelled().await });

        assert_eq!(coord.live_tasks(), 1);
        assert!(coord.drain(Duration::from_secs(1)).await);
        assert_eq!(coord.live_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_stragglers_after_grace() {
        let coord = ShutdownCoordinator::new();
        let (held, released) = tokio::sync::oneshot::channel::<()>();
        let straggler = coord.spawn(async move {
            let _held = held;
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        assert!(!coord.drain(Duration::from_millis(100)).await);
        assert_eq!(coord.live_tasks(), 0);
        assert_eq!(straggler.await.unwrap(), None);
        // Dropping the task dropped what it owned.
        assert!(released.await.is_err());
    }

    #[tokio::test]
    async fn finished_task_output_is_returned() {
        let coord = ShutdownCoordinator::new();
        assert_eq!(coord.spawn(async { 7 }).await.unwrap(), Some(7));
    }
}
