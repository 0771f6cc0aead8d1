use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::FanoutError;
use super::handlers::{FanoutContext, backfill_feed, distribute_post, run_handler};
use super::tasks::{TaskEnvelope, TaskName};

type BoxedHandler =
    Arc<dyn Fn(FanoutContext, Value) -> BoxFuture<'static, Result<(), FanoutError>> + Send + Sync>;

/// Dispatch table from task name to handler.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<TaskName, BoxedHandler>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `distributePost` and `backfillFeed` handlers.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(TaskName::DistributePost, distribute_post);
        registry.register(TaskName::BackfillFeed, backfill_feed);
        registry
    }

    pub fn register<P, F, Fut>(&mut self, name: TaskName, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(FanoutContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FanoutError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let boxed: BoxedHandler = Arc::new(move |ctx: FanoutContext, arguments: Value| {
            let handler = Arc::clone(&handler);
            async move {
                let payload: P = serde_json::from_value(arguments)
                    .map_err(|err| FanoutError::invalid_arguments(name.as_str(), err))?;
                handler(ctx, payload).await
            }
            .boxed()
        });
        self.handlers.insert(name, boxed);
    }

    pub async fn dispatch(
        &self,
        ctx: &FanoutContext,
        task: &TaskEnvelope,
    ) -> Result<(), FanoutError> {
        let handler = self
            .handlers
            .get(&task.name)
            .ok_or_else(|| FanoutError::UnknownTask(task.name.as_str().to_string()))?;
        let fut = handler(ctx.clone(), task.arguments.clone());
        run_handler(task.name, ctx.handler_timeout, fut).await
    }
}
