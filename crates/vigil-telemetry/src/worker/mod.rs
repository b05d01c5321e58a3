//! Bounded pool for fire-and-forget side effects.
//!
//! Alert delivery and geolocation run here so ingestion never waits on
//! them. The queue has a hard capacity; on saturation the [`OverflowPolicy`]
//! either evicts the oldest queued task or rejects the new one.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::PoolConfig;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    Reject,
}

/// Outcome of [`BackgroundPool::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Accepted { depth: usize },
    /// Queued after evicting the oldest waiting task.
    DroppedOldest { dropped: &'static str, depth: usize },
    Rejected,
    /// The pool is shutting down.
    Closed,
}

impl Submitted {
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::DroppedOldest { .. })
    }
}

/// Counters since the pool started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub accepted: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub completed: u64,
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

struct Shared {
    queue: Mutex<VecDeque<(&'static str, Task)>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
    policy: OverflowPolicy,
    counters: Counters,
}

pub struct BackgroundPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundPool {
    /// Start `workers` worker tasks on the current runtime.
    pub fn new(workers: usize, capacity: usize, policy: OverflowPolicy) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity: capacity.max(1),
            policy,
            counters: Counters::default(),
        });

        let handles = (0..workers.max(1))
            .map(|worker| tokio::spawn(run_worker(worker, Arc::clone(&shared))))
            .collect();

        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.workers, config.capacity, config.overflow)
    }

    /// Queue `task` without waiting. `label` names the task kind in logs.
    pub fn submit<F>(&self, label: &'static str, task: F) -> Submitted
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let counters = &self.shared.counters;
        let outcome = {
            // Checked under the queue lock so a queued task is always seen
            // by a worker before it stops.
            let mut queue = self.shared.queue.lock();
            if self.shared.closed.load(Ordering::SeqCst) {
                Submitted::Closed
            } else if queue.len() < self.shared.capacity {
                queue.push_back((label, Box::pin(task)));
                Submitted::Accepted { depth: queue.len() }
            } else {
                match self.shared.policy {
                    OverflowPolicy::Reject => Submitted::Rejected,
                    OverflowPolicy::DropOldest => {
                        let dropped = queue.pop_front().map_or("none", |(l, _)| l);
                        queue.push_back((label, Box::pin(task)));
                        Submitted::DroppedOldest {
                            dropped,
                            depth: queue.len(),
                        }
                    }
                }
            }
        };

        match outcome {
            Submitted::Accepted { .. } => {
                counters.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Submitted::DroppedOldest { dropped, .. } => {
                counters.accepted.fetch_add(1, Ordering::Relaxed);
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task = label, dropped, "Background queue full, dropped oldest task");
            }
            Submitted::Rejected => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task = label, "Background queue full, rejected task");
            }
            Submitted::Closed => {}
        }

        if outcome.is_queued() {
            self.shared.notify.notify_one();
        }
        outcome
    }

    /// Tasks waiting for a worker.
    pub fn depth(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, drain what is queued and wait for the workers.
    pub async fn shutdown(&self) {
        {
            let _queue = self.shared.queue.lock();
            self.shared.closed.store(true, Ordering::SeqCst);
        }
        self.shared.notify.notify_waiters();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background worker exited abnormally");
            }
        }
    }
}

impl std::fmt::Debug for BackgroundPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPool")
            .field("capacity", &self.shared.capacity)
            .field("policy", &self.shared.policy)
            .field("depth", &self.depth())
            .finish()
    }
}

async fn run_worker(worker: usize, shared: Arc<Shared>) {
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let (next, closed) = {
            let mut queue = shared.queue.lock();
            (queue.pop_front(), shared.closed.load(Ordering::SeqCst))
        };
        match next {
            Some((label, task)) => {
                // Run on its own task so a panic only loses this task.
                match tokio::spawn(task).await {
                    Ok(()) => {
                        shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        shared.counters.panicked.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(worker, task = label, error = %e, "Background task failed");
                    }
                }
            }
            None if closed => break,
            None => notified.await,
        }
    }
    tracing::debug!(worker, "Background worker stopped");
}
