//! Cache storage implementations.
//!
//! Stores hold opaque serialized records under a [`CacheKey`] with a TTL. The
//! cache-aside layer owns (de)serialization; a store only moves bytes.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;
use tokio::time::Instant;

use super::config::CacheConfig;
use super::keys::CacheKey;
use crate::util::lock::rw_write;

const SOURCE: &str = "murmur::cache::store";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache record could not be decoded: {0}")]
    Codec(String),
}

impl CacheError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;
}

struct StoredValue {
    expires_at: Instant,
    bytes: Vec<u8>,
}

/// In-process LRU store; expired entries are dropped on access.
pub struct MemoryCacheStore {
    entries: RwLock<LruCache<String, StoredValue>>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        rw_write(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let rendered = key.render();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let expired = match entries.get(&rendered) {
            Some(value) if value.expires_at > Instant::now() => {
                return Ok(Some(value.bytes.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&rendered);
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let stored = StoredValue {
            expires_at: Instant::now() + ttl,
            bytes: value,
        };
        rw_write(&self.entries, SOURCE, "set").put(key.render(), stored);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        rw_write(&self.entries, SOURCE, "delete").pop(&key.render());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::UserId;

    fn key(raw: &str) -> CacheKey {
        CacheKey::Feed(UserId::parse(raw).expect("user"))
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryCacheStore::new(&CacheConfig::default());
        store
            .set(&key("a1"), b"page".to_vec(), Duration::from_secs(60))
            .await
            .expect("set");

        assert_eq!(
            store.get(&key("a1")).await.expect("get"),
            Some(b"page".to_vec())
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get(&key("a1")).await.expect("get"), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let config = CacheConfig {
            memory_capacity: 2,
            ..CacheConfig::default()
        };
        let store = MemoryCacheStore::new(&config);
        let ttl = Duration::from_secs(60);

        store.set(&key("a1"), vec![1], ttl).await.expect("set");
        store.set(&key("b2"), vec![2], ttl).await.expect("set");
        store.get(&key("a1")).await.expect("touch");
        store.set(&key("c3"), vec![3], ttl).await.expect("set");

        assert!(store.get(&key("a1")).await.expect("get").is_some());
        assert!(store.get(&key("b2")).await.expect("get").is_none());
        assert!(store.get(&key("c3")).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = MemoryCacheStore::new(&CacheConfig::default());
        let ttl = Duration::from_secs(60);
        store.set(&key("a1"), vec![1], ttl).await.expect("set");
        store.delete(&key("a1")).await.expect("delete");
        assert!(store.get(&key("a1")).await.expect("get").is_none());
    }
}
