//! Cache-aside repository.
//!
//! Wraps an origin [`Repository`] and keeps point lookups, first pages and
//! follow sets in a [`CacheStore`]. Writes go to the origin first and then
//! refresh or invalidate the affected records. Cache failures are logged,
//! counted and treated as misses; they never fail a request.
//!
//! Consistency is best effort: a first page cached before a concurrent write
//! may be served until its TTL elapses.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::application::pagination::{CursorPage, PageRequest};
use crate::application::repos::{RepoError, Repository};
use crate::domain::entities::{FeedEntry, Post, PostDraft, SubscribeOutcome};
use crate::domain::types::{PostId, UserId};

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::store::{CacheError, CacheStore};

const SOURCE: &str = "murmur::cache::repository";

pub(crate) const METRIC_CACHE_HIT: &str = "murmur_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "murmur_cache_miss_total";
pub(crate) const METRIC_CACHE_ERROR: &str = "murmur_cache_error_total";

pub struct CachedRepository {
    origin: Arc<dyn Repository>,
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl CachedRepository {
    pub fn new(
        origin: Arc<dyn Repository>,
        store: Arc<dyn CacheStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            origin,
            store,
            config,
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                counter!(METRIC_CACHE_MISS, "kind" => key.kind()).increment(1);
                return None;
            }
            Err(err) => {
                record_cache_error(key, "get", &err);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                counter!(METRIC_CACHE_HIT, "kind" => key.kind()).increment(1);
                Some(value)
            }
            Err(err) => {
                record_cache_error(key, "decode", &CacheError::Codec(err.to_string()));
                None
            }
        }
    }

    async fn remember<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                record_cache_error(key, "encode", &CacheError::Codec(err.to_string()));
                return;
            }
        };
        if let Err(err) = self.store.set(key, bytes, self.config.ttl).await {
            record_cache_error(key, "set", &err);
        }
    }

    async fn forget(&self, key: &CacheKey) {
        match self.store.delete(key).await {
            Ok(()) => debug!(target = SOURCE, key = %key, "cache entry invalidated"),
            Err(err) => record_cache_error(key, "delete", &err),
        }
    }

    /// Serve a first page from the cache when it is full-sized; any other
    /// request goes to the origin. Fresh first pages are stored on the way out.
    async fn first_page<T, F, Fut>(
        &self,
        key: CacheKey,
        page: &PageRequest,
        load: F,
    ) -> Result<CursorPage<T>, RepoError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<CursorPage<T>, RepoError>>,
    {
        if !page.is_first() {
            return load().await;
        }

        if let Some(cached) = self.lookup::<CursorPage<T>>(&key).await {
            if cached.items.len() == page.size() as usize {
                return Ok(cached);
            }
            debug!(
                target = SOURCE,
                key = %key,
                cached = cached.items.len(),
                requested = page.size(),
                "cached first page size differs, reading origin"
            );
        }

        let fresh = load().await?;
        self.remember(&key, &fresh).await;
        Ok(fresh)
    }

    async fn follow_set<F, Fut>(
        &self,
        key: CacheKey,
        load: F,
    ) -> Result<BTreeSet<UserId>, RepoError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<BTreeSet<UserId>, RepoError>>,
    {
        if let Some(cached) = self.lookup::<BTreeSet<UserId>>(&key).await {
            return Ok(cached);
        }
        let fresh = load().await?;
        self.remember(&key, &fresh).await;
        Ok(fresh)
    }
}

fn record_cache_error(key: &CacheKey, op: &'static str, err: &CacheError) {
    counter!(METRIC_CACHE_ERROR, "kind" => key.kind(), "op" => op).increment(1);
    warn!(
        target = SOURCE,
        key = %key,
        op,
        error = %err,
        "cache operation failed, falling back to origin"
    );
}

#[async_trait]
impl Repository for CachedRepository {
    async fn create_post(&self, author_id: &UserId, draft: PostDraft) -> Result<Post, RepoError> {
        let post = self.origin.create_post(author_id, draft).await?;
        self.remember(&CacheKey::Post(post.id.clone()), &post).await;
        self.forget(&CacheKey::AuthorPosts(author_id.clone())).await;
        Ok(post)
    }

    async fn edit_post(
        &self,
        acting_user_id: &UserId,
        post_id: &PostId,
        new_text: String,
    ) -> Result<Post, RepoError> {
        let post = self
            .origin
            .edit_post(acting_user_id, post_id, new_text)
            .await?;
        self.remember(&CacheKey::Post(post.id.clone()), &post).await;
        self.forget(&CacheKey::AuthorPosts(post.author_id.clone()))
            .await;
        Ok(post)
    }

    async fn get_post_by_id(&self, post_id: &PostId) -> Result<Post, RepoError> {
        let key = CacheKey::Post(post_id.clone());
        if let Some(post) = self.lookup::<Post>(&key).await {
            return Ok(post);
        }
        let post = self.origin.get_post_by_id(post_id).await?;
        self.remember(&key, &post).await;
        Ok(post)
    }

    async fn list_posts_by_author(
        &self,
        author_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<Post>, RepoError> {
        self.first_page(CacheKey::AuthorPosts(author_id.clone()), page, || {
            self.origin.list_posts_by_author(author_id, page)
        })
        .await
    }

    async fn subscribe(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<SubscribeOutcome, RepoError> {
        let outcome = self.origin.subscribe(follower_id, followee_id).await?;
        self.forget(&CacheKey::Subscriptions(follower_id.clone()))
            .await;
        self.forget(&CacheKey::Subscribers(followee_id.clone()))
            .await;
        Ok(outcome)
    }

    async fn list_followees(&self, user_id: &UserId) -> Result<BTreeSet<UserId>, RepoError> {
        self.follow_set(CacheKey::Subscriptions(user_id.clone()), || {
            self.origin.list_followees(user_id)
        })
        .await
    }

    async fn list_followers(&self, user_id: &UserId) -> Result<BTreeSet<UserId>, RepoError> {
        self.follow_set(CacheKey::Subscribers(user_id.clone()), || {
            self.origin.list_followers(user_id)
        })
        .await
    }

    async fn list_feed(
        &self,
        owner_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<FeedEntry>, RepoError> {
        self.first_page(CacheKey::Feed(owner_id.clone()), page, || {
            self.origin.list_feed(owner_id, page)
        })
        .await
    }

    async fn append_feed_entry(&self, entry: FeedEntry) -> Result<(), RepoError> {
        let key = CacheKey::Feed(entry.owner_id.clone());
        self.origin.append_feed_entry(entry).await?;
        self.forget(&key).await;
        Ok(())
    }
}
