use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::instrument;
use vigil_state::LeaseBackend;

use super::{jittered, RetentionHandle, TaskHandle};
use crate::config::{RetentionConfig, SweepSchedule};
use crate::model::Category;
use crate::sink::SinkRegistry;
use crate::TelemetryError;

/// What a retention loop deletes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepTarget {
    /// The unified log index.
    Index,
    Category(Category),
}

impl SweepTarget {
    pub fn all() -> impl Iterator<Item = Self> {
        std::iter::once(Self::Index).chain(Category::ALL.into_iter().map(Self::Category))
    }

    /// Lease guarding this target across instances.
    pub fn lease_name(self) -> String {
        format!("retention:{self}")
    }
}

impl fmt::Display for SweepTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => f.write_str("index"),
            Self::Category(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// No horizon configured; nothing is ever deleted.
    Unbounded,
    /// Another instance holds the lease.
    Skipped,
    Swept { records: u64, index_entries: u64 },
}

/// Deletes records older than each target's configured horizon.
#[derive(Clone)]
pub struct RetentionSweeper {
    registry: SinkRegistry,
    leases: Arc<dyn LeaseBackend>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(registry: SinkRegistry, leases: Arc<dyn LeaseBackend>, config: RetentionConfig) -> Self {
        Self {
            registry,
            leases,
            config,
        }
    }

    pub const fn schedule(&self, target: SweepTarget) -> SweepSchedule {
        match target {
            SweepTarget::Index => self.config.index,
            SweepTarget::Category(category) => self.config.schedule(category),
        }
    }

    /// Run one sweep of `target` now.
    pub async fn sweep_once(&self, target: SweepTarget) -> Result<SweepOutcome, TelemetryError> {
        self.sweep_at(target, Utc::now()).await
    }

    /// Run one sweep of `target` as if the current time were `now`.
    #[instrument(skip_all, fields(sweep = %target))]
    pub async fn sweep_at(
        &self,
        target: SweepTarget,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, TelemetryError> {
        let Some(horizon) = self.schedule(target).horizon() else {
            return Ok(SweepOutcome::Unbounded);
        };
        let Some(lease) = self
            .leases
            .try_acquire(&target.lease_name(), self.config.lease_ttl())
            .await?
        else {
            tracing::debug!("Retention lease held elsewhere, skipping");
            return Ok(SweepOutcome::Skipped);
        };

        let cutoff = now - horizon;
        let result = self.delete_before(target, cutoff).await;
        if let Err(e) = lease.release().await {
            tracing::warn!(error = %e, "Failed to release retention lease");
        }
        let (records, index_entries) = result?;

        tracing::info!(
            cutoff = %cutoff,
            records,
            index_entries,
            "Retention sweep complete"
        );
        Ok(SweepOutcome::Swept {
            records,
            index_entries,
        })
    }

    async fn delete_before(
        &self,
        target: SweepTarget,
        cutoff: DateTime<Utc>,
    ) -> Result<(u64, u64), TelemetryError> {
        let index = self.registry.index();
        match target {
            SweepTarget::Index => Ok((0, index.delete_created_before(cutoff, None).await?)),
            SweepTarget::Category(category) => {
                let records = self
                    .registry
                    .sink(category)?
                    .delete_created_before(cutoff)
                    .await?;
                // Entries for swept records go with them.
                let index_entries = match category.ref_type() {
                    Some(ref_type) => index.delete_created_before(cutoff, Some(ref_type)).await?,
                    None => 0,
                };
                Ok((records, index_entries))
            }
        }
    }

    /// Spawn one loop per target that has a horizon.
    pub fn start(self) -> RetentionHandle {
        let sweeper = Arc::new(self);
        let tasks = SweepTarget::all()
            .filter(|target| sweeper.schedule(*target).horizon_days.is_some())
            .map(|target| Self::spawn_loop(Arc::clone(&sweeper), target))
            .collect();
        RetentionHandle::new(tasks)
    }

    fn spawn_loop(sweeper: Arc<Self>, target: SweepTarget) -> TaskHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let interval = sweeper.schedule(target).interval();
        let jitter = sweeper.config.jitter();

        let join_handle = tokio::spawn(async move {
            tracing::info!(
                sweep = %target,
                interval_secs = interval.as_secs(),
                "Starting retention loop"
            );
            loop {
                let wait = jittered(interval, jitter);
                tokio::select! {
                    () = tokio::time::sleep(wait) => {
                        if let Err(e) = sweeper.sweep_once(target).await {
                            tracing::error!(sweep = %target, error = %e, "Retention sweep failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!(sweep = %target, "Retention loop stopping");
                        break;
                    }
                }
            }
        });
        TaskHandle::new(target.lease_name(), shutdown_tx, join_handle)
    }
}

impl fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
