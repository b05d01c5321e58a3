use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::LeaseError;
use crate::traits::LeaseOps;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A claimed unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub payload: Vec<u8>,
    /// How many times this job has been claimed, including the current claim.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Remaining lifetime of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(Duration),
}

impl KeyTtl {
    pub const fn remaining(self) -> Option<Duration> {
        match self {
            Self::Expires(d) => Some(d),
            Self::Missing | Self::Persistent => None,
        }
    }
}

/// A held lease. Dropping it releases the lease in the background.
pub struct Lease {
    name: String,
    token: String,
    ops: Arc<dyn LeaseOps>,
    released: AtomicBool,
}

impl Lease {
    pub fn new(name: String, token: String, ops: Arc<dyn LeaseOps>) -> Self {
        Self {
            name,
            token,
            ops,
            released: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn renew(&self, ttl: Duration) -> Result<(), LeaseError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(LeaseError::NotHeld);
        }
        self.ops.renew(&self.name, &self.token, ttl).await
    }

    pub async fn release(self) -> Result<(), LeaseError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ops.release(&self.name, &self.token).await
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Without a runtime the lease simply runs out its ttl.
            return;
        };

        let ops = Arc::clone(&self.ops);
        let name = std::mem::take(&mut self.name);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = ops.release(&name, &token).await {
                tracing::warn!(lease = %name, error = %e, "Failed to release lease on drop");
            }
        });
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("name", &self.name)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}
