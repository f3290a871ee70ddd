//! Metrics cache
//!
//! The dashboard snapshot is served from a cache keyed by [`DASHBOARD_KEY`].
//! Every sync run flushes the namespace up front so a crash mid-run can only
//! leave the cache empty, never stale.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use billmirror_shared::{SyncError, SyncResult};

/// Cache key of the serialized dashboard snapshot.
pub const DASHBOARD_KEY: &str = "dashboard_data";

/// String-valued cache with per-entry TTL. `ttl = None` stores forever.
#[allow(async_fn_in_trait)]
pub trait MetricsCache: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> SyncResult<()>;
    async fn forget(&self, key: &str) -> SyncResult<()>;
    /// Drop every key this cache owns.
    async fn flush(&self) -> SyncResult<()>;
}

pub async fn put_json<C: MetricsCache, T: Serialize>(
    cache: &C,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> SyncResult<()> {
    let body = serde_json::to_string(value)?;
    cache.put(key, &body, ttl).await
}

pub async fn get_json<C: MetricsCache, T: DeserializeOwned>(
    cache: &C,
    key: &str,
) -> SyncResult<Option<T>> {
    match cache.get(key).await? {
        Some(body) => Ok(Some(serde_json::from_str(&body)?)),
        None => Ok(None),
    }
}

/// Process-local cache, used in tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsCache for InMemoryCache {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => Ok(None),
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> SyncResult<()> {
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn forget(&self, key: &str) -> SyncResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn flush(&self) -> SyncResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// Redis-backed cache. Keys are namespaced so flushing only clears this
/// pipeline's entries, never the whole database.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
    namespace: String,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, namespace: impl Into<String>) -> SyncResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SyncError::Cache(format!("Invalid Redis URL: {}", e)))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| SyncError::Cache(format!("Redis connection failed: {}", e)))?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

impl MetricsCache for RedisCache {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(self.namespaced(key))
            .await
            .map_err(|e| SyncError::Cache(e.to_string()))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        let key = self.namespaced(key);
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(|e| SyncError::Cache(e.to_string())),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| SyncError::Cache(e.to_string())),
        }
    }

    async fn forget(&self, key: &str) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.namespaced(key))
            .await
            .map_err(|e| SyncError::Cache(e.to_string()))
    }

    async fn flush(&self) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(format!("{}:*", self.namespace))
            .await
            .map_err(|e| SyncError::Cache(e.to_string()))?;
        if !keys.is_empty() {
            conn.del::<_, ()>(keys)
                .await
                .map_err(|e| SyncError::Cache(e.to_string()))?;
        }
        Ok(())
    }
}
