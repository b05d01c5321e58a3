use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{CacheError, LeaseError, QueueError};
use crate::traits::{CacheStore, JobQueue, LeaseBackend, LeaseOps};
use crate::types::{Job, JobId, KeyTtl, Lease};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: evict lazily.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value: value.to_vec(),
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|e| e.is_live(Instant::now())))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(match entries.get(key) {
            Some(entry) if entry.is_live(now) => match entry.expires_at {
                Some(at) => KeyTtl::Expires(at.saturating_duration_since(now)),
                None => KeyTtl::Persistent,
            },
            _ => KeyTtl::Missing,
        })
    }
}

#[derive(Debug)]
struct QueuedJob {
    job: Job,
    visible_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryJobQueue {
    queues: Arc<Mutex<HashMap<String, VecDeque<QueuedJob>>>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, queue: &str, payload: &[u8]) -> Result<JobId, QueueError> {
        let id = JobId::new(Uuid::new_v4().to_string());
        let mut queues = self.queues.lock().await;
        queues
            .entry(queue.to_string())
            .or_default()
            .push_back(QueuedJob {
                job: Job {
                    id: id.clone(),
                    payload: payload.to_vec(),
                    attempt: 0,
                    enqueued_at: Utc::now(),
                },
                visible_at: Instant::now(),
            });
        Ok(id)
    }

    async fn claim(&self, queue: &str, lease: Duration) -> Result<Option<Job>, QueueError> {
        let mut queues = self.queues.lock().await;
        let Some(jobs) = queues.get_mut(queue) else {
            return Ok(None);
        };

        let now = Instant::now();
        let claimed = jobs.iter_mut().find(|q| q.visible_at <= now).map(|q| {
            q.visible_at = now + lease;
            q.job.attempt += 1;
            q.job.clone()
        });
        Ok(claimed)
    }

    async fn complete(&self, queue: &str, job: &JobId) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let jobs = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::JobNotFound(job.to_string()))?;

        let position = jobs
            .iter()
            .position(|q| q.job.id == *job)
            .ok_or_else(|| QueueError::JobNotFound(job.to_string()))?;
        jobs.remove(position);
        Ok(())
    }

    async fn retry(&self, queue: &str, job: &JobId, delay: Duration) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let entry = queues
            .get_mut(queue)
            .and_then(|jobs| jobs.iter_mut().find(|q| q.job.id == *job))
            .ok_or_else(|| QueueError::JobNotFound(job.to_string()))?;
        entry.visible_at = Instant::now() + delay;
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map_or(0, VecDeque::len))
    }
}

#[derive(Debug, Clone)]
struct HeldLease {
    token: String,
    expires_at: Instant,
}

/// Process-local leases. Only meaningful for single-instance deployments
/// and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeases {
    held: Arc<Mutex<HashMap<String, HeldLease>>>,
}

impl MemoryLeases {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseOps for MemoryLeases {
    async fn release(&self, name: &str, token: &str) -> Result<(), LeaseError> {
        let mut held = self.held.lock().await;
        if held.get(name).is_some_and(|h| h.token == token) {
            held.remove(name);
        }
        Ok(())
    }

    async fn renew(&self, name: &str, token: &str, ttl: Duration) -> Result<(), LeaseError> {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        match held.get_mut(name) {
            Some(h) if h.token == token && h.expires_at > now => {
                h.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(LeaseError::NotHeld),
        }
    }
}

#[async_trait]
impl LeaseBackend for MemoryLeases {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lease>, LeaseError> {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        if held.get(name).is_some_and(|h| h.expires_at > now) {
            return Ok(None);
        }

        let token = Uuid::new_v4().to_string();
        held.insert(
            name.to_string(),
            HeldLease {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(Lease::new(
            name.to_string(),
            token,
            Arc::new(self.clone()),
        )))
    }
}
