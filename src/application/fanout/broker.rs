use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::entities::Post;
use crate::domain::types::UserId;

use super::error::FanoutError;
use super::tasks::{BackfillFeedPayload, DistributePostPayload, TaskEnvelope, TaskHandle, TaskName};

const SOURCE: &str = "murmur::application::fanout::broker";

/// Durable or in-process task queue.
///
/// `submit` returns once the broker has acknowledged the task; execution is
/// asynchronous and at-least-once.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    async fn submit(&self, task: TaskEnvelope) -> Result<TaskHandle, FanoutError>;
}

/// Builds fan-out tasks for the write paths that trigger them.
#[derive(Clone)]
pub struct FanoutProducer {
    broker: Arc<dyn TaskBroker>,
}

impl FanoutProducer {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self { broker }
    }

    pub async fn distribute_post(&self, post: &Post) -> Result<TaskHandle, FanoutError> {
        let payload = DistributePostPayload { post: post.clone() };
        let handle = self
            .broker
            .submit(TaskEnvelope::new(TaskName::DistributePost, &payload)?)
            .await?;
        debug!(target = SOURCE, task_id = %handle.id, post_id = %post.id, "distribution submitted");
        Ok(handle)
    }

    pub async fn backfill_feed(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<TaskHandle, FanoutError> {
        let payload = BackfillFeedPayload {
            follower_id: follower_id.clone(),
            followee_id: followee_id.clone(),
        };
        let handle = self
            .broker
            .submit(TaskEnvelope::new(TaskName::BackfillFeed, &payload)?)
            .await?;
        debug!(
            target = SOURCE,
            task_id = %handle.id,
            follower_id = %follower_id,
            followee_id = %followee_id,
            "backfill submitted"
        );
        Ok(handle)
    }
}
