//! Background deletion: per-category retention sweeps and the site cascade
//! cleanup worker.

mod cleanup;
mod sweeper;

use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use cleanup::{SiteCleanupJob, SiteCleanupWorker, SITE_CLEANUP_QUEUE};
pub use sweeper::{RetentionSweeper, SweepOutcome, SweepTarget};

/// `base` plus a uniformly random extra delay of up to `jitter`.
pub(crate) fn jittered(base: Duration, jitter: Duration) -> Duration {
    let max = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    if max == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}

/// Handle for one background loop.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<()>,
}

impl TaskHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        shutdown_tx: oneshot::Sender<()>,
        join_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            name: name.into(),
            shutdown_tx: Some(shutdown_tx),
            join_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the loop to stop and wait for it. A run in progress finishes
    /// first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.join_handle.await {
            tracing::warn!(task = %self.name, error = %e, "Background task ended abnormally");
        }
    }

    pub fn abort(self) {
        self.join_handle.abort();
    }
}

/// Handles for every running retention loop.
#[derive(Debug, Default)]
pub struct RetentionHandle {
    tasks: Vec<TaskHandle>,
}

impl RetentionHandle {
    pub(crate) fn new(tasks: Vec<TaskHandle>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(TaskHandle::name)
    }

    pub async fn shutdown(self) {
        for task in self.tasks {
            task.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_range() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let d = jittered(base, Duration::from_secs(2));
            assert!(d >= base && d <= base + Duration::from_secs(2));
        }
        assert_eq!(jittered(base, Duration::ZERO), base);
    }
}
