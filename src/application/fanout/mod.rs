//! Fan-out-on-write pipeline.
//!
//! Producers submit `distributePost` and `backfillFeed` tasks to a
//! [`TaskBroker`]; consumers resolve them through the [`TaskRegistry`] and
//! materialize feed entries against the repository contract.

mod broker;
mod channel;
mod error;
mod handlers;
mod registry;
mod tasks;

pub use broker::{FanoutProducer, TaskBroker};
pub use channel::{ChannelBroker, ChannelQueue, ChannelWorker, WorkerOptions};
pub use error::FanoutError;
pub(crate) use handlers::METRIC_FANOUT_TASK;
pub use handlers::{
    DEFAULT_BACKFILL_PAGE_SIZE, FanoutContext, backfill_feed, distribute_post, run_handler,
};
pub use registry::TaskRegistry;
pub use tasks::{BackfillFeedPayload, DistributePostPayload, TaskEnvelope, TaskHandle, TaskName};
