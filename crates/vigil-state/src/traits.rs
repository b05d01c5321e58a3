use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CacheError, LeaseError, QueueError};
use crate::types::{Job, JobId, KeyTtl, Lease};

/// Key/value cache with optional per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`. `None` means the entry never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Returns `true` if an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// All live keys starting with `prefix`, in no particular order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError>;
}

/// Durable at-least-once work queue.
///
/// A claimed job stays invisible to other consumers for the lease duration.
/// If it is neither completed nor retried before then, it becomes claimable
/// again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, payload: &[u8]) -> Result<JobId, QueueError>;

    async fn claim(&self, queue: &str, lease: Duration) -> Result<Option<Job>, QueueError>;

    async fn complete(&self, queue: &str, job: &JobId) -> Result<(), QueueError>;

    /// Release a claimed job so it becomes visible again after `delay`.
    async fn retry(&self, queue: &str, job: &JobId, delay: Duration) -> Result<(), QueueError>;

    /// Number of jobs in the queue, claimed or not.
    async fn depth(&self, queue: &str) -> Result<usize, QueueError>;
}

#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Take the named lease if nobody holds it. Never waits.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lease>, LeaseError>;
}

/// Operations a [`Lease`] calls back into once it has been granted.
#[async_trait]
pub trait LeaseOps: Send + Sync {
    async fn release(&self, name: &str, token: &str) -> Result<(), LeaseError>;

    async fn renew(&self, name: &str, token: &str, ttl: Duration) -> Result<(), LeaseError>;
}
