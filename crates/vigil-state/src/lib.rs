//! Infrastructure backends for the vigil telemetry engine.
//!
//! Three capabilities are exposed through traits so the engine never depends
//! on a concrete store:
//!
//! - [`CacheStore`]: byte-oriented key/value cache with optional expiry.
//! - [`JobQueue`]: durable work queue with claim/complete/retry semantics.
//! - [`LeaseBackend`]: named, expiring leases for singleton background work.
//!
//! In-memory implementations are always available behind the `memory`
//! feature. Valkey (cache, leases) and PostgreSQL (job queue) are opt-in.

mod error;
mod traits;
mod types;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "valkey")]
mod valkey;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "config")]
mod config;

#[cfg(feature = "config")]
mod provider;

pub use error::{CacheError, LeaseError, QueueError, StateError};
pub use traits::{CacheStore, JobQueue, LeaseBackend, LeaseOps};
pub use types::{Job, JobId, KeyTtl, Lease};

#[cfg(feature = "memory")]
pub use memory::{MemoryCache, MemoryJobQueue, MemoryLeases};

#[cfg(feature = "valkey")]
pub use valkey::{ValkeyCache, ValkeyLeases};

#[cfg(feature = "postgres")]
pub use postgres::PostgresJobQueue;

#[cfg(feature = "config")]
pub use config::{CacheConfig, LeaseConfig, QueueConfig, StateConfig};

#[cfg(feature = "config")]
pub use provider::StateProvider;
