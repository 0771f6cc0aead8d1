//! In-process broker backed by a tokio channel.
//!
//! Used for single-node runs and tests. Tasks are retried in place up to a
//! fixed attempt budget; anything still failing after that is logged and
//! dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broker::TaskBroker;
use super::error::FanoutError;
use super::handlers::FanoutContext;
use super::registry::TaskRegistry;
use super::tasks::{TaskEnvelope, TaskHandle};

const SOURCE: &str = "murmur::application::fanout::channel";

#[derive(Debug)]
struct QueuedTask {
    id: String,
    envelope: TaskEnvelope,
    attempt: u32,
}

#[derive(Default)]
struct Backlog {
    pending: AtomicUsize,
    idle: Notify,
}

impl Backlog {
    fn enter(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct ChannelBroker {
    sender: mpsc::UnboundedSender<QueuedTask>,
    next_id: Arc<AtomicU64>,
    backlog: Arc<Backlog>,
}

/// Receiving half of a [`ChannelBroker`]; turn it into a worker to run tasks.
pub struct ChannelQueue {
    receiver: mpsc::UnboundedReceiver<QueuedTask>,
    broker: ChannelBroker,
}

impl ChannelBroker {
    pub fn channel() -> (ChannelBroker, ChannelQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let broker = ChannelBroker {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
            backlog: Arc::new(Backlog::default()),
        };
        let queue = ChannelQueue {
            receiver,
            broker: broker.clone(),
        };
        (broker, queue)
    }

    /// Tasks submitted and not yet finished, retries included.
    pub fn pending(&self) -> usize {
        self.backlog.pending.load(Ordering::SeqCst)
    }

    /// Wait until every submitted task has succeeded or exhausted its attempts.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.backlog.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    fn requeue(&self, task: QueuedTask) -> Result<(), QueuedTask> {
        self.sender.send(task).map_err(|err| err.0)
    }
}

#[async_trait]
impl TaskBroker for ChannelBroker {
    async fn submit(&self, task: TaskEnvelope) -> Result<TaskHandle, FanoutError> {
        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = TaskHandle {
            id: id.clone(),
            name: task.name,
        };

        self.backlog.enter();
        let queued = QueuedTask {
            id,
            envelope: task,
            attempt: 1,
        };
        if self.sender.send(queued).is_err() {
            self.backlog.leave();
            return Err(FanoutError::submission("local task queue is closed"));
        }
        Ok(handle)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub concurrency: usize,
    pub max_attempts: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 5,
        }
    }
}

impl ChannelQueue {
    pub fn into_worker(
        self,
        registry: TaskRegistry,
        context: FanoutContext,
        options: WorkerOptions,
    ) -> ChannelWorker {
        ChannelWorker {
            queue: self,
            registry: Arc::new(registry),
            context,
            options,
        }
    }
}

pub struct ChannelWorker {
    queue: ChannelQueue,
    registry: Arc<TaskRegistry>,
    context: FanoutContext,
    options: WorkerOptions,
}

impl ChannelWorker {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Consume tasks until the process shuts down.
    pub async fn run(self) {
        let ChannelWorker {
            queue,
            registry,
            context,
            options,
        } = self;
        let ChannelQueue {
            mut receiver,
            broker,
        } = queue;
        let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));

        info!(
            target = SOURCE,
            concurrency = options.concurrency,
            max_attempts = options.max_attempts,
            "local fan-out worker started"
        );

        while let Some(task) = receiver.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let registry = Arc::clone(&registry);
            let context = context.clone();
            let broker = broker.clone();

            tokio::spawn(async move {
                let result = registry.dispatch(&context, &task.envelope).await;
                drop(permit);
                settle(&broker, task, result, options.max_attempts);
            });
        }

        debug!(target = SOURCE, "local fan-out worker stopped");
    }
}

fn settle(
    broker: &ChannelBroker,
    task: QueuedTask,
    result: Result<(), FanoutError>,
    max_attempts: u32,
) {
    let err = match result {
        Ok(()) => {
            broker.backlog.leave();
            return;
        }
        Err(err) => err,
    };

    let retryable = !matches!(
        err,
        FanoutError::UnknownTask(_) | FanoutError::InvalidArguments { .. }
    );
    if !retryable || task.attempt >= max_attempts {
        error!(
            target = SOURCE,
            task_id = %task.id,
            task = task.envelope.name.as_str(),
            attempt = task.attempt,
            error = %err,
            "fan-out task abandoned"
        );
        broker.backlog.leave();
        return;
    }

    warn!(
        target = SOURCE,
        task_id = %task.id,
        task = task.envelope.name.as_str(),
        attempt = task.attempt,
        "fan-out task will be retried"
    );
    let retry = QueuedTask {
        attempt: task.attempt + 1,
        ..task
    };
    if broker.requeue(retry).is_err() {
        broker.backlog.leave();
    }
}
