//! Redis-backed cache store.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use super::keys::CacheKey;
use super::store::{CacheError, CacheStore};

const SOURCE: &str = "murmur::cache::redis";

/// Shared Redis store. The connection manager reconnects on its own and is
/// cheap to clone per command.
#[derive(Clone)]
pub struct RedisCacheStore {
    redis: ConnectionManager,
}

impl RedisCacheStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::backend)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(CacheError::backend)?;
        info!(target = SOURCE, "connected to redis cache");
        Ok(Self::new(manager))
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.redis.clone();
        conn.get::<_, Option<Vec<u8>>>(key.render())
            .await
            .map_err(CacheError::backend)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        redis::cmd("SET")
            .arg(key.render())
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(CacheError::backend)
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key.render())
            .await
            .map_err(CacheError::backend)
    }
}
