use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(String),
}

/// Key/value cache used for read-side memoisation.
///
/// Failures are absorbed by implementations: a broken cache degrades to a miss,
/// it never fails the caller.
#[async_trait]
pub trait CacheService: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Duration);

    async fn invalidate(&self, key: &str);

    async fn invalidate_prefix(&self, prefix: &str);
}

pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheService, key: &str) -> Option<T> {
    let raw = cache.get(key).await?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Dropping undecodable cache entry {}: {}", key, e);
            cache.invalidate(key).await;
            None
        }
    }
}

pub async fn set_json<T: Serialize>(cache: &dyn CacheService, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        Err(e) => warn!("Not caching {}: {}", key, e),
    }
}

// ==============================================================================
// IN-MEMORY CACHE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().await.values().filter(|(_, expires)| *expires > now).count()
    }
}

#[async_trait]
impl CacheService for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            _ => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }

    async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !key.starts_with(prefix));
    }
}

// ==============================================================================
// REDIS CACHE
// ==============================================================================

pub struct RedisCache {
    pool: Pool,
    namespace: String,
}

/// Builds a pool and checks it with a `PING` before handing it out.
pub async fn create_redis_pool(redis_url: &str) -> Result<Pool, CacheError> {
    let pool = Config::from_url(redis_url)
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| CacheError::Pool(format!("Pool creation error: {}", e)))?;

    let mut conn = pool.get().await.map_err(|e| CacheError::Pool(e.to_string()))?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    info!("Redis connection pool initialized");

    Ok(pool)
}

impl RedisCache {
    pub fn new(pool: Pool, namespace: &str) -> Self {
        Self {
            pool,
            namespace: namespace.to_string(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    async fn connection(&self) -> Option<Connection> {
        match self.pool.get().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!("Redis cache unavailable: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl CacheService for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection().await?;
        match conn.get::<_, Option<String>>(self.namespaced(key)).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Redis GET {} failed: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let Some(mut conn) = self.connection().await else { return };
        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            warn!("Redis SET {} failed: {}", key, e);
        }
    }

    async fn invalidate(&self, key: &str) {
        let Some(mut conn) = self.connection().await else { return };
        if let Err(e) = conn.del::<_, ()>(self.namespaced(key)).await {
            warn!("Redis DEL {} failed: {}", key, e);
        }
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        let Some(mut conn) = self.connection().await else { return };
        let pattern = format!("{}*", self.namespaced(prefix));

        let keys: Vec<String> = match conn.keys(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Redis KEYS {} failed: {}", pattern, e);
                return;
            }
        };

        if keys.is_empty() {
            return;
        }

        debug!("Invalidating {} cache keys under {}", keys.len(), pattern);
        if let Err(e) = conn.del::<_, ()>(keys).await {
            warn!("Redis DEL for prefix {} failed: {}", prefix, e);
        }
    }
}
