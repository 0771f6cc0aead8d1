//! Cache-aside layer.
//!
//! [`CachedRepository`] composes in front of any other repository. Records
//! live in a [`CacheStore`]: Redis for shared deployments or an in-process
//! LRU for single-node runs and tests.

mod config;
mod keys;
mod redis_store;
mod repository;
mod store;

pub use config::CacheConfig;
pub use keys::CacheKey;
pub use redis_store::RedisCacheStore;
pub use repository::CachedRepository;
pub(crate) use repository::{METRIC_CACHE_ERROR, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
pub use store::{CacheError, CacheStore, MemoryCacheStore};
