use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;
use vigil_state::{CacheStore, KeyTtl};

use super::SiteRepository;
use crate::model::{Site, SiteId};
use crate::TelemetryError;

pub const SITE_KEY_PREFIX: &str = "site-info:id:";

pub fn site_cache_key(id: &SiteId) -> String {
    format!("{SITE_KEY_PREFIX}{id}")
}

/// Cache-aside resolver for sites.
///
/// Reads go to the cache first and fall back to the origin repository,
/// populating the cache on a miss. A failing cache never fails a read.
#[derive(Clone)]
pub struct SiteCacheResolver {
    cache: Arc<dyn CacheStore>,
    sites: SiteRepository,
    ttl: Option<Duration>,
}

impl SiteCacheResolver {
    pub fn new(cache: Arc<dyn CacheStore>, sites: SiteRepository, ttl: Option<Duration>) -> Self {
        Self { cache, sites, ttl }
    }

    pub fn repository(&self) -> &SiteRepository {
        &self.sites
    }

    #[instrument(skip(self), fields(site_id = %id))]
    pub async fn get(&self, id: &SiteId) -> Result<Option<Site>, TelemetryError> {
        let key = site_cache_key(id);
        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Site>(&bytes) {
                Ok(site) => return Ok(Some(site)),
                Err(e) => tracing::warn!(error = %e, "Discarding undecodable cached site"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Site cache read failed, using origin"),
        }

        let site = self.sites.find(id).await?;
        if let Some(site) = &site {
            if let Err(e) = self.set(site).await {
                tracing::warn!(error = %e, "Site cache populate failed");
            }
        }
        Ok(site)
    }

    pub async fn set(&self, site: &Site) -> Result<(), TelemetryError> {
        let bytes = serde_json::to_vec(site)?;
        self.cache
            .set(&site_cache_key(&site.id), &bytes, self.ttl)
            .await?;
        Ok(())
    }

    pub async fn invalidate(&self, id: &SiteId) -> Result<(), TelemetryError> {
        self.cache.delete(&site_cache_key(id)).await?;
        Ok(())
    }

    pub async fn ttl(&self, id: &SiteId) -> Result<KeyTtl, TelemetryError> {
        Ok(self.cache.ttl(&site_cache_key(id)).await?)
    }
}

impl std::fmt::Debug for SiteCacheResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteCacheResolver")
            .field("sites", &self.sites)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
