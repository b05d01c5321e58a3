//! Site administration and the cache-aside site resolver.

mod cache;
mod repository;
mod service;

pub use cache::{site_cache_key, SiteCacheResolver, SITE_KEY_PREFIX};
pub use repository::{SiteRepository, SITES_COLLECTION};
pub use service::SiteService;
