//! Shared setup for engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Map, Value};
use vigil_state::{MemoryCache, MemoryJobQueue, MemoryLeases, StateProvider};
use vigil_telemetry::config::{AlertConfig, GeoConfig, RetentionConfig};
use vigil_telemetry::model::{Category, SiteDraft};
use vigil_telemetry::store::MemoryDatabase;
use vigil_telemetry::{Engine, Site, TelemetryConfig, TelemetryEnvelope};

/// Engine over in-memory backends, with handles to the backends themselves.
pub struct TestEngine {
    pub engine: Engine,
    pub database: MemoryDatabase,
    pub queue: Arc<MemoryJobQueue>,
    pub leases: Arc<MemoryLeases>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(base_config())
    }

    pub fn with_config(config: TelemetryConfig) -> Self {
        let queue = Arc::new(MemoryJobQueue::new());
        let leases = Arc::new(MemoryLeases::new());
        let state = StateProvider::new()
            .with_cache(Arc::new(MemoryCache::new()))
            .with_queue(queue.clone())
            .with_lease(leases.clone());
        let database = MemoryDatabase::new();
        let engine = Engine::new(config, state, &database).expect("engine should build");
        Self {
            engine,
            database,
            queue,
            leases,
        }
    }

    pub async fn site(&self, name: &str) -> Site {
        self.engine
            .sites()
            .create(SiteDraft::named(name))
            .await
            .expect("site should be created")
    }

    /// Ingest one envelope of `category` carrying `payload`.
    pub async fn send(&self, site: &Site, category: Category, payload: Value) {
        let envelope = TelemetryEnvelope::new(category, site.id.as_str())
            .with_user("u-1")
            .with_payload(object(payload));
        self.engine
            .dispatcher()
            .ingest(envelope)
            .await
            .expect("ingest should succeed");
    }
}

/// In-memory configuration with outbound calls and retention switched off.
pub fn base_config() -> TelemetryConfig {
    TelemetryConfig {
        geo: GeoConfig {
            remote_enabled: false,
            ..GeoConfig::default()
        },
        alerts: AlertConfig {
            enabled: false,
            ..AlertConfig::default()
        },
        retention: RetentionConfig {
            enabled: false,
            ..RetentionConfig::default()
        },
        ..TelemetryConfig::default()
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
