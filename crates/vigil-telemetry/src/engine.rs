//! Wiring of stores, state backends and services into one handle.

use std::sync::Arc;

use vigil_state::StateProvider;

use crate::alert::AlertNotifier;
use crate::config::TelemetryConfig;
use crate::geo::GeoResolver;
use crate::ingest::Dispatcher;
use crate::query::{Analytics, CursorPaginator, RecordQueries};
use crate::retention::{RetentionHandle, RetentionSweeper, SiteCleanupWorker, TaskHandle};
use crate::sink::SinkRegistry;
use crate::sites::{SiteCacheResolver, SiteRepository, SiteService};
use crate::store::Database;
use crate::worker::BackgroundPool;
use crate::TelemetryError;

/// Every service of the engine, sharing one database and one set of state
/// backends.
#[derive(Clone)]
pub struct Engine {
    config: TelemetryConfig,
    state: StateProvider,
    registry: SinkRegistry,
    pool: Arc<BackgroundPool>,
    dispatcher: Dispatcher,
    sites: SiteService,
    analytics: Analytics,
    records: RecordQueries,
    paginator: CursorPaginator,
}

impl Engine {
    /// Build the engine. Spawns the background pool workers, so this must
    /// run inside a tokio runtime.
    pub fn new(
        config: TelemetryConfig,
        state: StateProvider,
        database: &dyn Database,
    ) -> Result<Self, TelemetryError> {
        let registry = SinkRegistry::new(database);
        let resolver = SiteCacheResolver::new(
            state.cache()?,
            SiteRepository::open(database),
            config.cache.site_ttl(),
        );
        let pool = Arc::new(BackgroundPool::from_config(&config.pool));
        let geo = Arc::new(GeoResolver::from_config(&config.geo)?);
        let notifier = Arc::new(AlertNotifier::new(&config.alerts)?);

        let dispatcher = Dispatcher::new(
            resolver.clone(),
            registry.clone(),
            Arc::clone(&pool),
            geo,
            notifier,
        );
        let sites = SiteService::new(resolver, state.queue()?);

        tracing::info!(
            workers = config.pool.workers,
            capacity = config.pool.capacity,
            "Telemetry engine initialised"
        );

        Ok(Self {
            analytics: Analytics::new(registry.clone()),
            records: RecordQueries::new(registry.clone()),
            paginator: CursorPaginator::new(registry.clone()),
            config,
            state,
            registry,
            pool,
            dispatcher,
            sites,
        })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sites(&self) -> &SiteService {
        &self.sites
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    pub fn records(&self) -> &RecordQueries {
        &self.records
    }

    pub fn paginator(&self) -> &CursorPaginator {
        &self.paginator
    }

    pub fn registry(&self) -> &SinkRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<BackgroundPool> {
        &self.pool
    }

    /// Start the site cleanup worker and, when enabled, the retention loops.
    pub fn start_background(&self) -> Result<BackgroundTasks, TelemetryError> {
        let cleanup = SiteCleanupWorker::new(
            self.registry.clone(),
            self.state.queue()?,
            self.config.cleanup.clone(),
        )
        .start();

        let retention = if self.config.retention.enabled {
            let handle = RetentionSweeper::new(
                self.registry.clone(),
                self.state.lease()?,
                self.config.retention.clone(),
            )
            .start();
            tracing::info!(loops = handle.len(), "Retention sweeps scheduled");
            Some(handle)
        } else {
            tracing::info!("Retention sweeps disabled");
            None
        };

        Ok(BackgroundTasks { cleanup, retention })
    }

    /// Stop accepting side effects and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        let stats = self.pool.stats();
        tracing::info!(
            completed = stats.completed,
            dropped = stats.dropped,
            rejected = stats.rejected,
            "Background pool drained"
        );
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Long-running maintenance tasks started by [`Engine::start_background`].
#[derive(Debug)]
pub struct BackgroundTasks {
    cleanup: TaskHandle,
    retention: Option<RetentionHandle>,
}

impl BackgroundTasks {
    pub fn retention(&self) -> Option<&RetentionHandle> {
        self.retention.as_ref()
    }

    pub async fn shutdown(self) {
        if let Some(retention) = self.retention {
            retention.shutdown().await;
        }
        self.cleanup.shutdown().await;
    }
}
