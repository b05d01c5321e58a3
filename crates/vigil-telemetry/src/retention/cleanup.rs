use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::instrument;
use vigil_state::JobQueue;

use super::TaskHandle;
use crate::config::CleanupConfig;
use crate::model::SiteId;
use crate::sink::SinkRegistry;
use crate::TelemetryError;

pub const SITE_CLEANUP_QUEUE: &str = "site-cleanup";

/// Queued request to delete every record of a deleted site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteCleanupJob {
    pub site_id: SiteId,
}

/// Consumes [`SiteCleanupJob`]s from the durable queue.
///
/// A failed cascade is put back on the queue and retried after the
/// configured delay.
#[derive(Clone)]
pub struct SiteCleanupWorker {
    registry: SinkRegistry,
    queue: Arc<dyn JobQueue>,
    config: CleanupConfig,
}

impl SiteCleanupWorker {
    pub fn new(registry: SinkRegistry, queue: Arc<dyn JobQueue>, config: CleanupConfig) -> Self {
        Self {
            registry,
            queue,
            config,
        }
    }

    /// Claim and process at most one job. Returns whether a job was claimed.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<bool, TelemetryError> {
        let Some(job) = self
            .queue
            .claim(SITE_CLEANUP_QUEUE, self.config.lease())
            .await?
        else {
            return Ok(false);
        };

        let request: SiteCleanupJob = match serde_json::from_slice(&job.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Dropping undecodable cleanup job");
                self.queue.complete(SITE_CLEANUP_QUEUE, &job.id).await?;
                return Ok(true);
            }
        };

        match self.registry.delete_site(&request.site_id).await {
            Ok(report) => {
                self.queue.complete(SITE_CLEANUP_QUEUE, &job.id).await?;
                tracing::info!(
                    job_id = %job.id,
                    site_id = %request.site_id,
                    records = report.records,
                    index_entries = report.index_entries,
                    "Site cleanup complete"
                );
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    site_id = %request.site_id,
                    attempt = job.attempt,
                    error = %e,
                    "Site cleanup failed, will retry"
                );
                self.queue
                    .retry(SITE_CLEANUP_QUEUE, &job.id, self.config.retry_delay())
                    .await?;
                Err(e)
            }
        }
    }

    /// Poll the queue until shut down.
    pub fn start(self) -> TaskHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let poll = self.config.poll_interval();

        let join_handle = tokio::spawn(async move {
            tracing::info!(
                poll_ms = u64::try_from(poll.as_millis()).unwrap_or(u64::MAX),
                "Starting site cleanup worker"
            );
            loop {
                let busy = match self.run_once().await {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        tracing::error!(error = %e, "Site cleanup iteration failed");
                        false
                    }
                };
                if busy {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                    continue;
                }
                tokio::select! {
                    () = tokio::time::sleep(poll) => {}
                    _ = &mut shutdown_rx => {
                        tracing::info!("Site cleanup worker stopping");
                        break;
                    }
                }
            }
        });
        TaskHandle::new("site-cleanup", shutdown_tx, join_handle)
    }
}

impl std::fmt::Debug for SiteCleanupWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteCleanupWorker")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, CategoryRecord};
    use crate::store::{Filter, MemoryDatabase};
    use serde_json::{json, Value};
    use std::time::Duration;
    use vigil_state::MemoryJobQueue;

    fn worker(queue: Arc<MemoryJobQueue>) -> SiteCleanupWorker {
        SiteCleanupWorker::new(
            SinkRegistry::new(&MemoryDatabase::new()),
            queue,
            CleanupConfig {
                retry_delay_secs: 0,
                ..CleanupConfig::default()
            },
        )
    }

    async fn pageview(registry: &SinkRegistry, site: &str) {
        let Value::Object(doc) = json!({"site_id": site, "create_at": 0, "path": "/"}) else {
            unreachable!()
        };
        let record = CategoryRecord::from_document(Category::Pageview, doc).unwrap();
        registry
            .sink(Category::Pageview)
            .unwrap()
            .create(&record)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn idle_queue_claims_nothing() {
        let worker = worker(Arc::new(MemoryJobQueue::new()));
        assert!(!worker.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn job_deletes_site_data_and_is_acked() {
        let queue = Arc::new(MemoryJobQueue::new());
        let worker = worker(queue.clone());
        pageview(&worker.registry, "gone").await;
        pageview(&worker.registry, "kept").await;

        let payload = serde_json::to_vec(&SiteCleanupJob {
            site_id: SiteId::new("gone"),
        })
        .unwrap();
        queue.enqueue(SITE_CLEANUP_QUEUE, &payload).await.unwrap();

        assert!(worker.run_once().await.unwrap());
        assert_eq!(queue.depth(SITE_CLEANUP_QUEUE).await.unwrap(), 0);
        let remaining = worker
            .registry
            .sink(Category::Pageview)
            .unwrap()
            .collection()
            .count(&Filter::All)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn garbage_payload_is_dropped() {
        let queue = Arc::new(MemoryJobQueue::new());
        queue.enqueue(SITE_CLEANUP_QUEUE, b"not json").await.unwrap();
        assert!(worker(queue.clone()).run_once().await.unwrap());
        assert_eq!(queue.depth(SITE_CLEANUP_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn started_worker_drains_queue() {
        let queue = Arc::new(MemoryJobQueue::new());
        let payload = serde_json::to_vec(&SiteCleanupJob {
            site_id: SiteId::new("gone"),
        })
        .unwrap();
        queue.enqueue(SITE_CLEANUP_QUEUE, &payload).await.unwrap();

        let handle = worker(queue.clone()).start();
        for _ in 0..50 {
            if queue.depth(SITE_CLEANUP_QUEUE).await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.depth(SITE_CLEANUP_QUEUE).await.unwrap(), 0);
        handle.shutdown().await;
    }
}
