//! PostgreSQL-backed task broker built on apalis.
//!
//! Each task name maps to its own apalis queue (the `job_type` column), so
//! `distributePost` and `backfillFeed` get independent worker pools.

use std::sync::Arc;

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Data, Error as ApalisError, Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::fanout::{
    BackfillFeedPayload, DistributePostPayload, FanoutContext, FanoutError, TaskBroker,
    TaskEnvelope, TaskHandle, TaskName, backfill_feed, distribute_post, run_handler,
};
use crate::config::FanoutSettings;

use super::error::InfraError;

const SOURCE: &str = "murmur::infra::queue";
const DEFAULT_PRIORITY: i32 = 0;

/// Submits fan-out tasks into the apalis job table.
#[derive(Clone)]
pub struct PostgresBroker {
    pool: PgPool,
    max_attempts: i32,
}

impl PostgresBroker {
    pub fn new(pool: PgPool, max_attempts: u32) -> Self {
        Self {
            pool,
            max_attempts: i32::try_from(max_attempts).unwrap_or(i32::MAX),
        }
    }
}

#[async_trait]
impl TaskBroker for PostgresBroker {
    async fn submit(&self, task: TaskEnvelope) -> Result<TaskHandle, FanoutError> {
        let id: String =
            sqlx::query_scalar("SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id")
                .bind(task.name.as_str())
                .bind(&task.arguments)
                .bind("Pending")
                .bind(OffsetDateTime::now_utc())
                .bind(self.max_attempts)
                .bind(DEFAULT_PRIORITY)
                .fetch_one(&self.pool)
                .await
                .map_err(FanoutError::submission)?;

        Ok(TaskHandle {
            id,
            name: task.name,
        })
    }
}

/// Shared context handed to apalis workers.
#[derive(Clone)]
pub struct FanoutWorkerContext {
    pub fanout: FanoutContext,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`] so apalis retries the job.
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}

pub async fn process_distribute_post_job(
    payload: DistributePostPayload,
    context: Data<FanoutWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = context.fanout.clone();
    run_handler(
        TaskName::DistributePost,
        ctx.handler_timeout,
        distribute_post(ctx, payload),
    )
    .await
    .map_err(job_failed)
}

pub async fn process_backfill_feed_job(
    payload: BackfillFeedPayload,
    context: Data<FanoutWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = context.fanout.clone();
    run_handler(
        TaskName::BackfillFeed,
        ctx.handler_timeout,
        backfill_feed(ctx, payload),
    )
    .await
    .map_err(job_failed)
}

/// Create the apalis schema if it is missing.
///
/// apalis records its migrations in the same `_sqlx_migrations` ledger as the
/// feed schema, so versions it does not know about are skipped, not rejected.
pub async fn ensure_queue_schema(pool: &PgPool) -> Result<(), InfraError> {
    let mut migrator = PostgresStorage::migrations();
    migrator.set_ignore_missing(true);
    migrator
        .run(pool)
        .await
        .map_err(|err| InfraError::database(format!("failed to set up job queue: {err}")))
}

/// Start one apalis worker per task name and supervise them on a background task.
pub fn spawn_fanout_monitor(
    pool: PgPool,
    context: FanoutWorkerContext,
    settings: &FanoutSettings,
) -> JoinHandle<()> {
    let distribute_storage: PostgresStorage<DistributePostPayload> =
        PostgresStorage::new_with_config(
            pool.clone(),
            ApalisSqlConfig::new(TaskName::DistributePost.as_str()),
        );
    let backfill_storage: PostgresStorage<BackfillFeedPayload> = PostgresStorage::new_with_config(
        pool,
        ApalisSqlConfig::new(TaskName::BackfillFeed.as_str()),
    );

    let distribute_concurrency = settings.distribute_concurrency.get() as usize;
    let backfill_concurrency = settings.backfill_concurrency.get() as usize;

    let distribute_worker = WorkerBuilder::new("distribute-post-worker")
        .concurrency(distribute_concurrency)
        .data(context.clone())
        .backend(distribute_storage)
        .build_fn(process_distribute_post_job);
    let backfill_worker = WorkerBuilder::new("backfill-feed-worker")
        .concurrency(backfill_concurrency)
        .data(context)
        .backend(backfill_storage)
        .build_fn(process_backfill_feed_job);

    let monitor = Monitor::new()
        .register(distribute_worker)
        .register(backfill_worker);

    info!(
        target = SOURCE,
        distribute_concurrency, backfill_concurrency, "fan-out workers registered"
    );

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(target = SOURCE, error = %err, "fan-out monitor stopped");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::RepoError;

    #[test]
    fn job_failed_keeps_the_cause() {
        let err = job_failed(FanoutError::from(RepoError::Timeout));
        match err {
            ApalisError::Failed(inner) => {
                assert_eq!(inner.to_string(), "repository deadline elapsed");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}
