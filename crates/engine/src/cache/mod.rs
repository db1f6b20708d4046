//! Per-user state cache.
//!
//! Holds serialized filter state between requests. Two implementations:
//! an in-process Moka cache, and a two-tier Moka (L1) + Redis (L2) cache
//! shared across instances. Entries never expire; they are replaced or
//! deleted explicitly.

use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;
use redis::AsyncCommands;
use redis::Client as RedisClient;
use redis::aio::MultiplexedConnection;
use tracing::{debug, warn};

use crate::config::EngineConfig;

/// Key/value store for per-user state.
///
/// Backend failures are logged and treated as misses; losing cached filter
/// state only resets a user's selections.
#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str);
    async fn delete(&self, key: &str);
}

/// In-process cache.
#[derive(Clone)]
pub struct MemoryCache {
    local: Cache<String, String>,
}

impl MemoryCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            local: Cache::builder().max_capacity(capacity).build(),
        }
    }
}

#[async_trait]
impl UserCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.local.get(key).await
    }

    async fn set(&self, key: &str, value: &str) {
        self.local.insert(key.to_string(), value.to_string()).await;
    }

    async fn delete(&self, key: &str) {
        self.local.invalidate(key).await;
    }
}

/// Filter state shared across instances.
///
/// Reads go to the local Moka copy first and fall through to Redis; a Redis
/// hit is copied locally. Writes and deletes go to both. When Redis is
/// unreachable the local copy still serves this instance.
#[derive(Clone)]
pub struct RedisCache {
    inner: Arc<RedisCacheInner>,
}

struct RedisCacheInner {
    local: Cache<String, String>,
    redis: RedisClient,
}

impl RedisCache {
    pub fn new(redis: RedisClient, capacity: u64) -> Self {
        let local = Cache::builder().max_capacity(capacity).build();
        Self {
            inner: Arc::new(RedisCacheInner { local, redis }),
        }
    }

    async fn connection(&self, op: &'static str) -> Option<MultiplexedConnection> {
        match self.inner.redis.get_multiplexed_async_connection().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(error = %e, op, "redis unavailable, filter state kept locally");
                None
            }
        }
    }
}

#[async_trait]
impl UserCache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        if let Some(state) = self.inner.local.get(key).await {
            return Some(state);
        }

        let mut conn = self.connection("load").await?;
        let state: Option<String> = match conn.get(key).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, key, "could not load filter state from redis");
                return None;
            }
        };
        if let Some(state) = &state {
            debug!(key, "filter state restored from redis");
            self.inner.local.insert(key.to_string(), state.clone()).await;
        }
        state
    }

    async fn set(&self, key: &str, value: &str) {
        self.inner
            .local
            .insert(key.to_string(), value.to_string())
            .await;

        let Some(mut conn) = self.connection("store").await else {
            return;
        };
        match conn.set::<_, _, ()>(key, value).await {
            Ok(()) => debug!(key, bytes = value.len(), "filter state stored"),
            Err(e) => warn!(error = %e, key, "could not store filter state in redis"),
        }
    }

    async fn delete(&self, key: &str) {
        self.inner.local.invalidate(key).await;

        let Some(mut conn) = self.connection("clear").await else {
            return;
        };
        match conn.del::<_, ()>(key).await {
            Ok(()) => debug!(key, "filter state cleared"),
            Err(e) => warn!(error = %e, key, "could not clear filter state in redis"),
        }
    }
}

/// Build the cache configured by `config`: Redis-backed when a Redis URL is
/// set, in-process otherwise.
pub fn create_cache(config: &EngineConfig) -> anyhow::Result<Arc<dyn UserCache>> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let client = RedisClient::open(url)?;
            Ok(Arc::new(RedisCache::new(client, config.cache_capacity)))
        }
        None => Ok(Arc::new(MemoryCache::new(config.cache_capacity))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_round_trip() {
        let cache = MemoryCache::new(100);
        assert_eq!(cache.get("k").await, None);

        cache.set("k", "v1").await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v1"));

        cache.set("k", "v2").await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v2"));

        cache.delete("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn redis_cache_keeps_local_state_when_redis_is_down() {
        // Nothing listens on port 1.
        let client = RedisClient::open("redis://127.0.0.1:1/").unwrap();
        let cache = RedisCache::new(client, 10);
        assert_eq!(cache.get("quarry:filters:2:users").await, None);

        cache.set("quarry:filters:2:users", "{}").await;
        assert_eq!(cache.get("quarry:filters:2:users").await.as_deref(), Some("{}"));

        cache.delete("quarry:filters:2:users").await;
        assert_eq!(cache.get("quarry:filters:2:users").await, None);
    }

    #[test]
    fn create_cache_defaults_to_memory() {
        let config = EngineConfig::default();
        assert!(create_cache(&config).is_ok());
    }

    #[test]
    fn create_cache_rejects_bad_redis_url() {
        let config = EngineConfig {
            redis_url: Some("not a url".to_string()),
            ..EngineConfig::default()
        };
        assert!(create_cache(&config).is_err());
    }
}
