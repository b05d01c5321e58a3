//! Error enums, one per state capability.

use thiserror::Error;

/// Site cache failures. Callers treat these as misses.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Cleanup job queue failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection error: {0}")]
    Connection(String),

    /// The job was completed or its claim expired.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Retention lease failures.
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Lease not held or expired")]
    NotHeld,

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Connection error: {0}")]
    Connection(String),
}
