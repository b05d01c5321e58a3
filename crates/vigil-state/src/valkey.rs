//! Valkey/Redis adapters for the cache and lease backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::{CacheError, LeaseError};
use crate::traits::{CacheStore, LeaseBackend, LeaseOps};
use crate::types::{KeyTtl, Lease};

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 500;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

async fn connect(url: &str, pool_size: usize) -> Result<Pool, String> {
    let pool = Config::from_url(url)
        .builder()
        .map_err(|e| e.to_string())?
        .max_size(pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| e.to_string())?;

    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
    redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await
        .map_err(|e| e.to_string())?;

    Ok(pool)
}

fn namespaced(namespace: Option<&str>, key: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}:{key}"),
        None => key.to_string(),
    }
}

#[derive(Clone)]
pub struct ValkeyCache {
    pool: Pool,
    namespace: Option<String>,
}

impl ValkeyCache {
    pub async fn new(
        url: &str,
        namespace: Option<String>,
        pool_size: usize,
    ) -> Result<Self, CacheError> {
        let pool = connect(url, pool_size)
            .await
            .map_err(CacheError::Connection)?;
        Ok(Self { pool, namespace })
    }

    async fn conn(&self) -> Result<Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }

    fn key(&self, key: &str) -> String {
        namespaced(self.namespace.as_deref(), key)
    }

    fn strip<'a>(&self, key: &'a str) -> &'a str {
        match &self.namespace {
            Some(ns) => key
                .strip_prefix(ns.as_str())
                .and_then(|k| k.strip_prefix(':'))
                .unwrap_or(key),
            None => key,
        }
    }
}

#[async_trait]
impl CacheStore for ValkeyCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn().await?;
        conn.get(self.key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let key = self.key(key);
        let result = match ttl {
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                conn.pset_ex::<_, _, ()>(&key, value, millis).await
            }
            None => conn.set::<_, _, ()>(&key, value).await,
        };
        result.map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .del(self.key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn().await?;
        let pattern = self.key(&format!("{prefix}*"));

        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut *conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;

            found.extend(batch.iter().map(|k| self.strip(k).to_string()));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(found)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        let mut conn = self.conn().await?;
        let millis: i64 = conn
            .pttl(self.key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        // PTTL: -2 missing, -1 no expiry.
        Ok(match millis {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(Duration::from_millis(u64::try_from(ms).unwrap_or(0))),
        })
    }
}

struct LeaseInner {
    pool: Pool,
    namespace: Option<String>,
}

impl LeaseInner {
    fn key(&self, name: &str) -> String {
        namespaced(self.namespace.as_deref(), &format!("lease:{name}"))
    }

    async fn conn(&self) -> Result<Connection, LeaseError> {
        self.pool
            .get()
            .await
            .map_err(|e| LeaseError::Connection(e.to_string()))
    }
}

/// Leases stored as `SET NX PX` keys holding a random token.
#[derive(Clone)]
pub struct ValkeyLeases {
    inner: Arc<LeaseInner>,
}

impl ValkeyLeases {
    pub async fn new(
        url: &str,
        namespace: Option<String>,
        pool_size: usize,
    ) -> Result<Self, LeaseError> {
        let pool = connect(url, pool_size)
            .await
            .map_err(LeaseError::Connection)?;
        Ok(Self {
            inner: Arc::new(LeaseInner { pool, namespace }),
        })
    }
}

#[async_trait]
impl LeaseOps for ValkeyLeases {
    async fn release(&self, name: &str, token: &str) -> Result<(), LeaseError> {
        let mut conn = self.inner.conn().await?;
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.inner.key(name))
            .arg(token)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| LeaseError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn renew(&self, name: &str, token: &str, ttl: Duration) -> Result<(), LeaseError> {
        let mut conn = self.inner.conn().await?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let renewed: i64 = redis::Script::new(RENEW_SCRIPT)
            .key(self.inner.key(name))
            .arg(token)
            .arg(millis)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| LeaseError::Backend(e.to_string()))?;

        if renewed == 0 {
            return Err(LeaseError::NotHeld);
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseBackend for ValkeyLeases {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lease>, LeaseError> {
        let mut conn = self.inner.conn().await?;
        let token = Uuid::new_v4().to_string();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let granted: Option<String> = redis::cmd("SET")
            .arg(self.inner.key(name))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut *conn)
            .await
            .map_err(|e| LeaseError::Backend(e.to_string()))?;

        Ok(granted.map(|_| Lease::new(name.to_string(), token, Arc::new(self.clone()))))
    }
}
