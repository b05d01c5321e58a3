//! Vigil Telemetry - front-end monitoring ingestion and analytics engine.
//!
//! This crate provides:
//! - Per-category ingestion of client telemetry with a unified log index
//! - Time-bucket, PV/UV and top-value analytics over stored records
//! - Cursor and offset pagination with cross-collection lookup
//! - Rule-based error alerting through markdown webhooks
//! - Scheduled retention sweeps and queued site cascade cleanup
//!
//! ## Architecture
//!
//! ```text
//! Envelope → Dispatcher → category sink ──→ log index
//!               │                               ↓
//!               └→ background pool        Analytics / Paginators
//!                   (alerts, geolocation)
//!
//! Site cache (CacheStore) ─ Site repository
//! Retention sweeps (LeaseBackend) · Cleanup worker (JobQueue)
//! ```

pub mod alert;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod ingest;
pub mod model;
pub mod query;
pub mod retention;
pub mod sink;
pub mod sites;
pub mod store;
pub mod worker;

#[cfg(test)]
pub mod test_fixtures;

pub use config::TelemetryConfig;
pub use engine::{BackgroundTasks, Engine};
pub use error::TelemetryError;
pub use model::{Category, CategoryRecord, RecordId, Site, SiteId, TelemetryEnvelope};
