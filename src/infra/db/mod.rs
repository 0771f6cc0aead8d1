//! Postgres-backed repository implementation.

mod follows;
mod rows;
mod timeline;
mod util;

pub use util::map_sqlx_error;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::application::pagination::{CursorPage, PageRequest};
use crate::application::repos::{RepoError, Repository};
use crate::domain::entities::{FeedEntry, Post, PostDraft, SubscribeOutcome};
use crate::domain::types::{PostId, UserId};

const SCHEMA_SQL: &str = include_str!("../../../migrations/20260101000000_feed_schema.sql");

#[derive(Clone)]
pub struct PostgresRepository {
    pool: Arc<PgPool>,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    /// Apply the feed schema. Every statement is `IF NOT EXISTS`, so this runs
    /// once per process start without a migration ledger of its own.
    pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA_SQL).execute(pool).await.map(|_| ())
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_post(&self, author_id: &UserId, draft: PostDraft) -> Result<Post, RepoError> {
        self.insert_post(author_id, draft).await
    }

    async fn edit_post(
        &self,
        _acting_user_id: &UserId,
        post_id: &PostId,
        new_text: String,
    ) -> Result<Post, RepoError> {
        self.update_post_text(post_id, new_text).await
    }

    async fn get_post_by_id(&self, post_id: &PostId) -> Result<Post, RepoError> {
        self.find_post(post_id).await
    }

    async fn list_posts_by_author(
        &self,
        author_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<Post>, RepoError> {
        self.page_posts(author_id, page).await
    }

    async fn subscribe(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<SubscribeOutcome, RepoError> {
        if follower_id == followee_id {
            return Err(RepoError::SelfSubscription);
        }
        self.add_follow_edge(follower_id, followee_id).await
    }

    async fn list_followees(&self, user_id: &UserId) -> Result<BTreeSet<UserId>, RepoError> {
        self.followee_set(user_id).await
    }

    async fn list_followers(&self, user_id: &UserId) -> Result<BTreeSet<UserId>, RepoError> {
        self.follower_set(user_id).await
    }

    async fn list_feed(
        &self,
        owner_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<FeedEntry>, RepoError> {
        self.page_feed(owner_id, page).await
    }

    async fn append_feed_entry(&self, entry: FeedEntry) -> Result<(), RepoError> {
        self.insert_feed_entry(entry).await
    }
}
