//! Error types for the telemetry engine.

use vigil_state::{CacheError, LeaseError, QueueError, StateError};

use crate::store::StoreError;

/// Errors surfaced by ingestion, queries and site administration.
///
/// `Validation`, `NotFound` and `Duplicate` are caller errors and are
/// returned as-is. `ExternalService` only ever reaches background task
/// boundaries, where it is logged.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown site, record or cursor.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of thing that was looked up.
        entity: &'static str,
        /// The identifier that did not resolve.
        id: String,
    },

    /// Site name collision on create.
    #[error("site name already exists: {0}")]
    Duplicate(String),

    /// Store read or write failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// An aggregation pipeline could not be evaluated.
    #[error("aggregation failed")]
    Aggregation {
        #[source]
        source: StoreError,
    },

    /// Geolocation or webhook delivery failure.
    #[error("external service {service} failed: {message}")]
    ExternalService {
        /// Provider or webhook name.
        service: &'static str,
        /// Failure description.
        message: String,
    },

    /// State backend (cache, queue, lease) failure (boxed - large type).
    #[error("state backend error: {0}")]
    State(Box<StateBackendError>),

    /// JSON encoding or decoding error.
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Errors from the `vigil-state` backends.
#[derive(Debug, thiserror::Error)]
pub enum StateBackendError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Provider(#[from] StateError),
}

impl TelemetryError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn external(service: &'static str, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service,
            message: message.into(),
        }
    }

    /// Wrap a store failure raised while evaluating an aggregation.
    pub(crate) fn aggregation(source: StoreError) -> Self {
        Self::Aggregation { source }
    }
}

macro_rules! state_error_from {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for TelemetryError {
                fn from(err: $ty) -> Self {
                    Self::State(Box::new(err.into()))
                }
            }
        )+
    };
}

state_error_from!(CacheError, QueueError, LeaseError, StateError);
