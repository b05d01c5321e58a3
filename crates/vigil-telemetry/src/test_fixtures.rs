//! Composable test fixtures using rstest.
//!
//! ```text
//! test_config ─┐
//! test_state ──┼── test_engine
//! database ────┘
//! ```
//!
//! Fixtures that build an [`Engine`] spawn pool workers and must be used from
//! `#[tokio::test]` functions.

use std::sync::Arc;

use rstest::fixture;
use serde_json::{Map, Value};
use vigil_state::{MemoryCache, MemoryJobQueue, MemoryLeases, StateProvider};

use crate::config::{AlertConfig, GeoConfig, PoolConfig, RetentionConfig, TelemetryConfig};
use crate::model::{AlertRule, Site, SiteDraft};
use crate::store::MemoryDatabase;
use crate::Engine;

/// Offline, alert-free config with retention switched off.
#[fixture]
pub fn test_config() -> TelemetryConfig {
    TelemetryConfig {
        geo: GeoConfig {
            remote_enabled: false,
            ..GeoConfig::default()
        },
        alerts: AlertConfig {
            enabled: false,
            ..AlertConfig::default()
        },
        pool: PoolConfig {
            workers: 2,
            capacity: 64,
            ..PoolConfig::default()
        },
        retention: RetentionConfig {
            enabled: false,
            ..RetentionConfig::default()
        },
        ..TelemetryConfig::default()
    }
}

/// In-memory cache, queue and leases.
#[fixture]
pub fn test_state() -> StateProvider {
    StateProvider::new()
        .with_cache(Arc::new(MemoryCache::new()))
        .with_queue(Arc::new(MemoryJobQueue::new()))
        .with_lease(Arc::new(MemoryLeases::new()))
}

#[fixture]
pub fn database() -> MemoryDatabase {
    MemoryDatabase::new()
}

/// Engine plus the database behind it.
pub struct TestEngine {
    pub engine: Engine,
    pub database: MemoryDatabase,
}

#[fixture]
pub fn test_engine(
    test_config: TelemetryConfig,
    test_state: StateProvider,
    database: MemoryDatabase,
) -> TestEngine {
    let engine = Engine::new(test_config, test_state, &database).expect("engine should build");
    TestEngine { engine, database }
}

impl TestEngine {
    /// Create a site with the given alert rules.
    pub async fn site(&self, name: &str, rules: Vec<AlertRule>) -> Site {
        let mut draft = SiteDraft::named(name);
        draft.alert_rules = rules;
        self.engine
            .sites()
            .create(draft)
            .await
            .expect("site should be created")
    }
}

/// Unwrap a `json!` object literal.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
