//! Social timeline service.
//!
//! Orchestrates "write, then submit" for the operations that trigger fan-out
//! and resolves feed entries back to live posts for readers.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::fanout::{FanoutError, FanoutProducer};
use crate::application::pagination::{CursorPage, PageRequest};
use crate::application::repos::{RepoError, Repository, with_deadline};
use crate::domain::entities::{Post, PostDraft, SubscribeOutcome};
use crate::domain::types::{PostId, UserId};

const SOURCE: &str = "murmur::application::timeline";

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Fanout(#[from] FanoutError),
    #[error("post `{0}` belongs to another user")]
    Forbidden(PostId),
}

#[derive(Clone)]
pub struct TimelineService {
    repository: Arc<dyn Repository>,
    producer: FanoutProducer,
    deadline: Duration,
}

impl TimelineService {
    pub fn new(
        repository: Arc<dyn Repository>,
        producer: FanoutProducer,
        deadline: Duration,
    ) -> Self {
        Self {
            repository,
            producer,
            deadline,
        }
    }

    pub async fn create_post(
        &self,
        author_id: &UserId,
        draft: PostDraft,
    ) -> Result<Post, TimelineError> {
        let post =
            with_deadline(self.deadline, self.repository.create_post(author_id, draft)).await?;
        self.producer.distribute_post(&post).await?;
        Ok(post)
    }

    /// Edit a post owned by `acting_user_id`.
    pub async fn edit_post(
        &self,
        acting_user_id: &UserId,
        post_id: &PostId,
        new_text: String,
    ) -> Result<Post, TimelineError> {
        let current =
            with_deadline(self.deadline, self.repository.get_post_by_id(post_id)).await?;
        if &current.author_id != acting_user_id {
            return Err(TimelineError::Forbidden(post_id.clone()));
        }

        let post = with_deadline(
            self.deadline,
            self.repository.edit_post(acting_user_id, post_id, new_text),
        )
        .await?;
        Ok(post)
    }

    pub async fn get_post(&self, post_id: &PostId) -> Result<Post, TimelineError> {
        Ok(with_deadline(self.deadline, self.repository.get_post_by_id(post_id)).await?)
    }

    pub async fn list_posts(
        &self,
        author_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<Post>, TimelineError> {
        Ok(with_deadline(
            self.deadline,
            self.repository.list_posts_by_author(author_id, page),
        )
        .await?)
    }

    /// Follow `followee_id`. Only a new edge schedules a backfill.
    pub async fn subscribe(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<SubscribeOutcome, TimelineError> {
        let outcome = with_deadline(
            self.deadline,
            self.repository.subscribe(follower_id, followee_id),
        )
        .await?;

        match outcome {
            SubscribeOutcome::Subscribed => {
                self.producer.backfill_feed(follower_id, followee_id).await?;
                info!(
                    target = SOURCE,
                    follower_id = %follower_id,
                    followee_id = %followee_id,
                    "subscription created"
                );
            }
            SubscribeOutcome::AlreadySubscribed => {}
        }
        Ok(outcome)
    }

    pub async fn subscriptions(
        &self,
        user_id: &UserId,
    ) -> Result<BTreeSet<UserId>, TimelineError> {
        Ok(with_deadline(self.deadline, self.repository.list_followees(user_id)).await?)
    }

    pub async fn subscribers(
        &self,
        user_id: &UserId,
    ) -> Result<BTreeSet<UserId>, TimelineError> {
        Ok(with_deadline(self.deadline, self.repository.list_followers(user_id)).await?)
    }

    /// One feed page resolved to live posts, in feed order with repeated post
    /// ids dropped.
    pub async fn read_feed(
        &self,
        owner_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<Post>, TimelineError> {
        let entries =
            with_deadline(self.deadline, self.repository.list_feed(owner_id, page)).await?;

        let mut seen = HashSet::new();
        let ids: Vec<PostId> = entries
            .items
            .into_iter()
            .map(|entry| entry.post_id)
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let lookups = ids.iter().map(|id| async move {
            match with_deadline(self.deadline, self.repository.get_post_by_id(id)).await {
                Ok(post) => Ok(Some(post)),
                Err(RepoError::NotFound) => {
                    warn!(target = SOURCE, post_id = %id, "feed entry references a missing post");
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        });
        let posts = try_join_all(lookups).await?.into_iter().flatten().collect();

        Ok(CursorPage::new(posts, entries.next_page))
    }
}
