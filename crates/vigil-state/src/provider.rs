use std::sync::Arc;

use crate::config::{CacheConfig, LeaseConfig, QueueConfig, StateConfig};
use crate::error::StateError;
use crate::traits::{CacheStore, JobQueue, LeaseBackend};

#[cfg(feature = "memory")]
use crate::memory::{MemoryCache, MemoryJobQueue, MemoryLeases};

#[cfg(feature = "valkey")]
use crate::valkey::{ValkeyCache, ValkeyLeases};

#[cfg(feature = "postgres")]
use crate::postgres::PostgresJobQueue;

/// Holds the resolved state backends for the engine.
#[derive(Clone, Default)]
pub struct StateProvider {
    cache: Option<Arc<dyn CacheStore>>,
    queue: Option<Arc<dyn JobQueue>>,
    lease: Option<Arc<dyn LeaseBackend>>,
}

impl StateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_config(config: &StateConfig) -> Result<Self, StateError> {
        Ok(Self {
            cache: Some(Self::build_cache(&config.cache).await?),
            queue: Some(Self::build_queue(&config.queue).await?),
            lease: Some(Self::build_lease(&config.lease).await?),
        })
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn with_lease(mut self, lease: Arc<dyn LeaseBackend>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn cache(&self) -> Result<Arc<dyn CacheStore>, StateError> {
        self.cache
            .clone()
            .ok_or_else(|| StateError::NotConfigured("cache".to_string()))
    }

    pub fn queue(&self) -> Result<Arc<dyn JobQueue>, StateError> {
        self.queue
            .clone()
            .ok_or_else(|| StateError::NotConfigured("queue".to_string()))
    }

    pub fn lease(&self) -> Result<Arc<dyn LeaseBackend>, StateError> {
        self.lease
            .clone()
            .ok_or_else(|| StateError::NotConfigured("lease".to_string()))
    }

    async fn build_cache(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, StateError> {
        match config {
            #[cfg(feature = "memory")]
            CacheConfig::Memory => Ok(Arc::new(MemoryCache::new())),

            #[cfg(feature = "valkey")]
            CacheConfig::Valkey {
                url,
                namespace,
                pool_size,
            } => {
                let cache = ValkeyCache::new(url, namespace.clone(), *pool_size)
                    .await
                    .map_err(|e| StateError::Connection(e.to_string()))?;
                Ok(Arc::new(cache))
            }

            #[allow(unreachable_patterns)]
            _ => Err(StateError::UnsupportedBackend(
                "no cache backend enabled".to_string(),
            )),
        }
    }

    async fn build_queue(config: &QueueConfig) -> Result<Arc<dyn JobQueue>, StateError> {
        match config {
            #[cfg(feature = "memory")]
            QueueConfig::Memory => Ok(Arc::new(MemoryJobQueue::new())),

            #[cfg(feature = "postgres")]
            QueueConfig::Postgres { url, table } => {
                let queue = PostgresJobQueue::new(url, table.clone())
                    .await
                    .map_err(|e| StateError::Connection(e.to_string()))?;
                Ok(Arc::new(queue))
            }

            #[allow(unreachable_patterns)]
            _ => Err(StateError::UnsupportedBackend(
                "no queue backend enabled".to_string(),
            )),
        }
    }

    async fn build_lease(config: &LeaseConfig) -> Result<Arc<dyn LeaseBackend>, StateError> {
        match config {
            #[cfg(feature = "memory")]
            LeaseConfig::Memory => Ok(Arc::new(MemoryLeases::new())),

            #[cfg(feature = "valkey")]
            LeaseConfig::Valkey {
                url,
                namespace,
                pool_size,
            } => {
                let leases = ValkeyLeases::new(url, namespace.clone(), *pool_size)
                    .await
                    .map_err(|e| StateError::Connection(e.to_string()))?;
                Ok(Arc::new(leases))
            }

            #[allow(unreachable_patterns)]
            _ => Err(StateError::UnsupportedBackend(
                "no lease backend enabled".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for StateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProvider")
            .field("cache", &self.cache.is_some())
            .field("queue", &self.queue.is_some())
            .field("lease", &self.lease.is_some())
            .finish()
    }
}
