//! Feed materialization handlers.
//!
//! Both handlers fail fast: the first repository error aborts the task and the
//! broker redelivers it whole. Feed appends are idempotent, so a partially
//! applied task is safe to repeat.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{info, warn};

use crate::application::pagination::PageRequest;
use crate::application::repos::{RepoError, Repository};
use crate::domain::entities::FeedEntry;
use crate::domain::types::PageToken;

use super::error::FanoutError;
use super::tasks::{BackfillFeedPayload, DistributePostPayload, TaskName};

const SOURCE: &str = "murmur::application::fanout::handlers";

pub(crate) const METRIC_FANOUT_TASK: &str = "murmur_fanout_task_total";

pub const DEFAULT_BACKFILL_PAGE_SIZE: u32 = 100;

/// Capabilities shared by every fan-out handler.
///
/// Follower sets and author histories are read from `origin`, never from a
/// cache in front of it: a stale follower set drops posts for good, while a
/// stale feed page only lags until its entry expires. Feed appends go through
/// `repository` so cached feed pages are invalidated.
#[derive(Clone)]
pub struct FanoutContext {
    pub repository: Arc<dyn Repository>,
    pub origin: Arc<dyn Repository>,
    pub handler_timeout: Duration,
    pub backfill_page_size: u32,
}

impl FanoutContext {
    pub fn new(repository: Arc<dyn Repository>, handler_timeout: Duration) -> Self {
        Self {
            origin: repository.clone(),
            repository,
            handler_timeout,
            backfill_page_size: DEFAULT_BACKFILL_PAGE_SIZE,
        }
    }

    /// Read followers and author histories from `origin` instead of the
    /// repository handlers write through.
    pub fn with_origin(mut self, origin: Arc<dyn Repository>) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_backfill_page_size(mut self, size: u32) -> Self {
        self.backfill_page_size = size.max(1);
        self
    }
}

pub async fn distribute_post(
    ctx: FanoutContext,
    payload: DistributePostPayload,
) -> Result<(), FanoutError> {
    let post = payload.post;
    let followers = ctx.origin.list_followers(&post.author_id).await?;

    for follower in &followers {
        ctx.repository
            .append_feed_entry(FeedEntry::for_post(follower.clone(), &post))
            .await?;
    }

    info!(
        target = SOURCE,
        post_id = %post.id,
        author_id = %post.author_id,
        followers = followers.len(),
        "post distributed"
    );
    Ok(())
}

pub async fn backfill_feed(
    ctx: FanoutContext,
    payload: BackfillFeedPayload,
) -> Result<(), FanoutError> {
    let mut token = PageToken::sentinel();
    let mut copied = 0_usize;

    loop {
        let request =
            PageRequest::new(token, ctx.backfill_page_size).map_err(RepoError::from)?;
        let page = ctx
            .origin
            .list_posts_by_author(&payload.followee_id, &request)
            .await?;

        for post in &page.items {
            ctx.repository
                .append_feed_entry(FeedEntry::for_post(payload.follower_id.clone(), post))
                .await?;
        }
        copied += page.items.len();

        if page.is_last() {
            break;
        }
        token = page.next_page;
    }

    info!(
        target = SOURCE,
        follower_id = %payload.follower_id,
        followee_id = %payload.followee_id,
        copied,
        "feed backfilled"
    );
    Ok(())
}

/// Run a handler future under the context's deadline and record its outcome.
pub async fn run_handler<F>(name: TaskName, timeout: Duration, fut: F) -> Result<(), FanoutError>
where
    F: Future<Output = Result<(), FanoutError>>,
{
    let result = match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(FanoutError::TimedOut(name.as_str().to_string())),
    };

    let outcome = if result.is_ok() { "succeeded" } else { "failed" };
    counter!(METRIC_FANOUT_TASK, "task" => name.as_str(), "outcome" => outcome).increment(1);
    if let Err(err) = &result {
        warn!(target = SOURCE, task = name.as_str(), error = %err, "fan-out task failed");
    }
    result
}
