//! Repository contract shared by every storage backend.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::application::pagination::{CursorPage, PageRequest, PaginationError};
use crate::domain::entities::{FeedEntry, Post, PostDraft, SubscribeOutcome};
use crate::domain::types::{PostId, UserId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("post creation failed: {0}")]
    CreationFailed(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid page token: {0}")]
    InvalidPageToken(String),
    #[error("a user cannot subscribe to themself")]
    SelfSubscription,
    #[error("write failed: {0}")]
    Write(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("repository deadline elapsed")]
    Timeout,
}

impl RepoError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn write(err: impl std::fmt::Display) -> Self {
        Self::Write(err.to_string())
    }
}

impl From<PaginationError> for RepoError {
    fn from(err: PaginationError) -> Self {
        Self::InvalidPageToken(err.to_string())
    }
}

/// Storage contract for posts, follow edges and materialized feeds.
///
/// Implementations are selected once at startup and shared behind an `Arc`.
/// Deadlines are applied by callers through [`with_deadline`].
#[async_trait]
pub trait Repository: Send + Sync {
    /// Persist a new post, assigning its id, ordering key and timestamps.
    async fn create_post(&self, author_id: &UserId, draft: PostDraft) -> Result<Post, RepoError>;

    /// Replace the text of an existing post. Ownership is checked by the caller.
    async fn edit_post(
        &self,
        acting_user_id: &UserId,
        post_id: &PostId,
        new_text: String,
    ) -> Result<Post, RepoError>;

    async fn get_post_by_id(&self, post_id: &PostId) -> Result<Post, RepoError>;

    /// Posts of one author, newest first.
    async fn list_posts_by_author(
        &self,
        author_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<Post>, RepoError>;

    async fn subscribe(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<SubscribeOutcome, RepoError>;

    /// Users `user_id` follows.
    async fn list_followees(&self, user_id: &UserId) -> Result<BTreeSet<UserId>, RepoError>;

    /// Users following `user_id`.
    async fn list_followers(&self, user_id: &UserId) -> Result<BTreeSet<UserId>, RepoError>;

    async fn list_feed(
        &self,
        owner_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<FeedEntry>, RepoError>;

    /// Insert a feed entry. Appending the same post twice for one owner is a no-op.
    async fn append_feed_entry(&self, entry: FeedEntry) -> Result<(), RepoError>;
}

/// Run a repository future under a deadline.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, RepoError>
where
    F: Future<Output = Result<T, RepoError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RepoError::Timeout),
    }
}
