use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::instrument;
use vigil_state::{JobId, JobQueue};

use super::{SiteCacheResolver, SiteRepository};
use crate::model::{Site, SiteDraft, SiteId};
use crate::query::OffsetPage;
use crate::retention::{SiteCleanupJob, SITE_CLEANUP_QUEUE};
use crate::TelemetryError;

/// Site administration.
///
/// Every successful origin write is followed by a cache invalidation.
/// Deleting a site enqueues a durable cleanup job for its telemetry.
///
/// Name uniqueness holds within one service instance: creates and updates
/// are serialised around their name check. Across instances it is up to
/// the store's unique index on `name`.
#[derive(Clone)]
pub struct SiteService {
    resolver: SiteCacheResolver,
    queue: Arc<dyn JobQueue>,
    writes: Arc<Mutex<()>>,
}

impl SiteService {
    pub fn new(resolver: SiteCacheResolver, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            resolver,
            queue,
            writes: Arc::new(Mutex::new(())),
        }
    }

    fn repository(&self) -> &SiteRepository {
        self.resolver.repository()
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create(&self, draft: SiteDraft) -> Result<Site, TelemetryError> {
        draft.validate()?;
        let _guard = self.writes.lock().await;
        let name = draft.name.trim();
        if self.repository().find_by_name(name).await?.is_some() {
            return Err(TelemetryError::Duplicate(name.to_string()));
        }

        let now = Utc::now();
        let site = draft.into_site(SiteId::generate(), now, now);
        self.repository().insert(&site).await?;
        self.invalidate(&site.id).await;
        tracing::info!(site_id = %site.id, "Site created");
        Ok(site)
    }

    #[instrument(skip(self, draft), fields(site_id = %id))]
    pub async fn update(&self, id: &SiteId, draft: SiteDraft) -> Result<Site, TelemetryError> {
        draft.validate()?;
        let _guard = self.writes.lock().await;
        let existing = self
            .repository()
            .find(id)
            .await?
            .ok_or_else(|| TelemetryError::not_found("site", id.as_str()))?;

        let name = draft.name.trim();
        if let Some(other) = self.repository().find_by_name(name).await? {
            if other.id != existing.id {
                return Err(TelemetryError::Duplicate(name.to_string()));
            }
        }

        let site = draft.into_site(existing.id, existing.create_at, Utc::now());
        if !self.repository().replace(&site).await? {
            return Err(TelemetryError::not_found("site", id.as_str()));
        }
        self.invalidate(&site.id).await;
        tracing::info!("Site updated");
        Ok(site)
    }

    /// Delete a site and schedule removal of all its telemetry.
    ///
    /// The cleanup job is queued before the site row goes, so a failed
    /// enqueue leaves the site in place and the delete can be retried.
    #[instrument(skip(self), fields(site_id = %id))]
    pub async fn delete(&self, id: &SiteId) -> Result<JobId, TelemetryError> {
        if self.repository().find(id).await?.is_none() {
            return Err(TelemetryError::not_found("site", id.as_str()));
        }

        let payload = serde_json::to_vec(&SiteCleanupJob {
            site_id: id.clone(),
        })?;
        let job = self.queue.enqueue(SITE_CLEANUP_QUEUE, &payload).await?;

        // A cascade for a site with no data left is a no-op, so a job queued
        // for a site that was deleted concurrently is harmless.
        if !self.repository().delete(id).await? {
            return Err(TelemetryError::not_found("site", id.as_str()));
        }
        self.invalidate(id).await;
        tracing::info!(job_id = %job, "Site deleted, cleanup queued");
        Ok(job)
    }

    pub async fn get(&self, id: &SiteId) -> Result<Site, TelemetryError> {
        self.resolver
            .get(id)
            .await?
            .ok_or_else(|| TelemetryError::not_found("site", id.as_str()))
    }

    pub async fn list(&self, page: usize, size: usize) -> Result<OffsetPage<Site>, TelemetryError> {
        self.repository().list(page, size).await
    }

    async fn invalidate(&self, id: &SiteId) {
        // The origin write already succeeded; a stale entry ages out with its TTL.
        if let Err(e) = self.resolver.invalidate(id).await {
            tracing::warn!(site_id = %id, error = %e, "Site cache invalidation failed");
        }
    }
}

impl std::fmt::Debug for SiteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteService")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertRule;
    use crate::store::MemoryDatabase;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use vigil_state::{Job, MemoryCache, MemoryJobQueue, QueueError};

    fn resolver() -> SiteCacheResolver {
        SiteCacheResolver::new(
            Arc::new(MemoryCache::new()),
            SiteRepository::open(&MemoryDatabase::new()),
            Some(Duration::from_secs(60)),
        )
    }

    fn service() -> (SiteService, Arc<MemoryJobQueue>) {
        let queue = Arc::new(MemoryJobQueue::new());
        (SiteService::new(resolver(), queue.clone()), queue)
    }

    /// Queue whose enqueue fails until `recover` is called.
    struct FlakyQueue {
        inner: MemoryJobQueue,
        down: AtomicBool,
    }

    impl FlakyQueue {
        fn down() -> Self {
            Self {
                inner: MemoryJobQueue::new(),
                down: AtomicBool::new(true),
            }
        }

        fn recover(&self) {
            self.down.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl JobQueue for FlakyQueue {
        async fn enqueue(&self, queue: &str, payload: &[u8]) -> Result<JobId, QueueError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(QueueError::Connection("down".to_string()));
            }
            self.inner.enqueue(queue, payload).await
        }

        async fn claim(&self, queue: &str, lease: Duration) -> Result<Option<Job>, QueueError> {
            self.inner.claim(queue, lease).await
        }

        async fn complete(&self, queue: &str, job: &JobId) -> Result<(), QueueError> {
            self.inner.complete(queue, job).await
        }

        async fn retry(&self, queue: &str, job: &JobId, delay: Duration) -> Result<(), QueueError> {
            self.inner.retry(queue, job, delay).await
        }

        async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
            self.inner.depth(queue).await
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_names() {
        let (service, _) = service();
        service.create(SiteDraft::named("shop")).await.unwrap();
        let err = service.create(SiteDraft::named(" shop ")).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Duplicate(name) if name == "shop"));
    }

    #[tokio::test]
    async fn create_validates_before_writing() {
        let (service, _) = service();
        let draft = SiteDraft {
            alert_rules: vec![AlertRule::for_pattern("")],
            ..SiteDraft::named("shop")
        };
        assert!(matches!(
            service.create(draft).await,
            Err(TelemetryError::Validation(_))
        ));
        assert_eq!(service.list(1, 10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn update_is_visible_through_cache() {
        let (service, _) = service();
        let site = service.create(SiteDraft::named("shop")).await.unwrap();
        // Warm the cache with the original.
        assert_eq!(service.get(&site.id).await.unwrap().name, "shop");

        let updated = service
            .update(
                &site.id,
                SiteDraft {
                    alert_url: Some("https://hooks.test/a".to_string()),
                    ..SiteDraft::named("store")
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.create_at, site.create_at);

        let read = service.get(&site.id).await.unwrap();
        assert_eq!(read.name, "store");
        assert_eq!(read.alert_url.as_deref(), Some("https://hooks.test/a"));
    }

    #[tokio::test]
    async fn update_missing_site_is_not_found() {
        let (service, _) = service();
        let err = service
            .update(&SiteId::new("missing"), SiteDraft::named("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::NotFound { entity: "site", .. }));
    }

    #[tokio::test]
    async fn delete_queues_cleanup_job() {
        let (service, queue) = service();
        let site = service.create(SiteDraft::named("shop")).await.unwrap();
        service.get(&site.id).await.unwrap();

        service.delete(&site.id).await.unwrap();
        assert!(matches!(
            service.get(&site.id).await,
            Err(TelemetryError::NotFound { .. })
        ));

        let job = queue
            .claim(SITE_CLEANUP_QUEUE, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let payload: SiteCleanupJob = serde_json::from_slice(&job.payload).unwrap();
        assert_eq!(payload.site_id, site.id);
    }

    #[tokio::test]
    async fn failed_enqueue_keeps_site_for_retry() {
        let queue = Arc::new(FlakyQueue::down());
        let service = SiteService::new(resolver(), queue.clone());
        let site = service.create(SiteDraft::named("shop")).await.unwrap();

        let err = service.delete(&site.id).await.unwrap_err();
        assert!(matches!(err, TelemetryError::State(_)));
        assert_eq!(service.get(&site.id).await.unwrap().name, "shop");

        queue.recover();
        service.delete(&site.id).await.unwrap();
        assert_eq!(queue.depth(SITE_CLEANUP_QUEUE).await.unwrap(), 1);
        assert!(matches!(
            service.get(&site.id).await,
            Err(TelemetryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn deleting_missing_site_queues_nothing() {
        let (service, queue) = service();
        let err = service.delete(&SiteId::new("missing")).await.unwrap_err();
        assert!(matches!(err, TelemetryError::NotFound { entity: "site", .. }));
        assert_eq!(queue.depth(SITE_CLEANUP_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_creates_with_one_name_admit_one() {
        let (service, _) = service();
        let (a, b) = tokio::join!(
            service.create(SiteDraft::named("shop")),
            service.create(SiteDraft::named("shop")),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(service.list(1, 10).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn list_pages_sites() {
        let (service, _) = service();
        for name in ["a", "b", "c"] {
            service.create(SiteDraft::named(name)).await.unwrap();
        }
        let page = service.list(1, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
        assert_eq!(page.data.len(), 2);
    }
}
