//! At-least-once task dispatcher with bounded retries.
//!
//! Publishers push [`Task`] values onto a [`TaskQueue`]. A [`WorkerPool`]
//! delivers each task to the [`TaskHandler`] registered for its kind, with at
//! most `workers` handlers running at once. A task moves through
//! `Pending -> Delivered` and then ends in one of:
//!
//! - succeeded: the handler returned `Ok`; the task is gone.
//! - retried: the handler failed or panicked with retries left; `retries_left`
//!   is decremented and the task is requeued after a capped exponential
//!   backoff.
//! - exhausted: the last retry failed; the task is dropped and logged.
//!
//! The queue lives in memory. Tasks that are lost on restart or exhausted are
//! recovered by whatever produced them re-detecting the work (the archival
//! sweep), so every handler must be idempotent.

use crate::metrics;
use archivist_core::config::TaskConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Kinds of work the dispatcher knows how to route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// A batch of archival confirmations from the chain follower.
    ArchiveObjects,
    /// A root whose nodes are all archived: warm, flag, prune.
    ObjectArchived,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ArchiveObjects => "archive-objects",
            TaskKind::ObjectArchived => "object-archived",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of asynchronous work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub params: serde_json::Value,
    /// Filled with the configured maximum on publish when absent.
    #[serde(default)]
    pub retries_left: Option<u32>,
}

impl Task {
    pub fn new(kind: TaskKind, params: serde_json::Value) -> Self {
        Self {
            kind,
            params,
            retries_left: None,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries_left = Some(retries);
        self
    }
}

/// Dispatcher errors surfaced to publishers.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("task queue is closed")]
    QueueClosed,

    #[error("invalid params for {kind} task: {message}")]
    InvalidParams { kind: TaskKind, message: String },
}

/// Where orchestration code sends tasks. Publishing is fire-and-forget:
/// handler failures never come back through this call.
#[async_trait]
pub trait TaskPublisher: Send + Sync {
    async fn publish(&self, tasks: Vec<Task>) -> Result<(), DispatchError>;
}

/// Handles every task of one kind.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, params: serde_json::Value) -> anyhow::Result<()>;
}

/// Handlers keyed by task kind, filled in at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a kind, replacing any previous one.
    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> &mut Self {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::warn!(kind = %kind, "Replacing previously registered task handler");
        }
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.handlers.keys().copied().collect()
    }
}

/// Receiving half of a [`TaskQueue`], consumed by [`WorkerPool::new`].
pub struct TaskReceiver(mpsc::UnboundedReceiver<Task>);

/// In-memory task queue. Cloning gives another handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
    max_retries: u32,
    /// Tasks published and not yet in a terminal state.
    outstanding: Arc<AtomicUsize>,
}

impl TaskQueue {
    pub fn new(max_retries: u32) -> (Self, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                max_retries,
                outstanding: Arc::new(AtomicUsize::new(0)),
            },
            TaskReceiver(rx),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Number of tasks that are queued, running or waiting out a backoff.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Poll until no task is outstanding. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.outstanding() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Put a task back after a failed attempt, keeping its retry budget.
    fn requeue(&self, task: Task) -> bool {
        let kind = task.kind;
        if self.tx.send(task).is_err() {
            tracing::warn!(kind = %kind, "Task queue closed, dropping retry");
            self.finish_one();
            return false;
        }
        true
    }

    fn finish_one(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskPublisher for TaskQueue {
    async fn publish(&self, tasks: Vec<Task>) -> Result<(), DispatchError> {
        for mut task in tasks {
            let retries = *task.retries_left.get_or_insert(self.max_retries);
            let kind = task.kind;
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            if self.tx.send(task).is_err() {
                self.finish_one();
                return Err(DispatchError::QueueClosed);
            }
            metrics::TASKS_PUBLISHED
                .with_label_values(&[kind.as_str()])
                .inc();
            tracing::debug!(kind = %kind, retries_left = retries, "Task published");
        }
        Ok(())
    }
}

/// Terminal or retry outcome of one delivery.
#[derive(Debug)]
enum Delivery {
    Succeeded,
    Retried,
    Exhausted,
    Unhandled,
}

impl Delivery {
    fn label(&self) -> &'static str {
        match self {
            Delivery::Succeeded => "succeeded",
            Delivery::Retried => "retried",
            Delivery::Exhausted => "exhausted",
            Delivery::Unhandled => "unhandled",
        }
    }
}

struct PoolContext {
    registry: HandlerRegistry,
    queue: TaskQueue,
    config: TaskConfig,
    cancel: CancellationToken,
}

impl PoolContext {
    /// Run one attempt of `task` and decide what happens to it next.
    async fn deliver(self: Arc<Self>, mut task: Task) {
        let kind = task.kind;
        let Some(handler) = self.registry.get(kind) else {
            tracing::error!(kind = %kind, "No handler registered for task kind, dropping task");
            self.settle(kind, Delivery::Unhandled);
            return;
        };

        metrics::TASKS_IN_FLIGHT.inc();
        let started = Instant::now();
        let params = task.params.clone();
        // The handler runs in its own task so a panic is contained and
        // reported through the JoinHandle instead of killing the worker.
        let attempt = tokio::spawn(async move { handler.handle(params).await }).await;
        metrics::TASKS_IN_FLIGHT.dec();
        metrics::TASK_DURATION
            .with_label_values(&[kind.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let failure = match attempt {
            Ok(Ok(())) => {
                tracing::debug!(kind = %kind, "Task succeeded");
                self.settle(kind, Delivery::Succeeded);
                return;
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(join_err) if join_err.is_panic() => {
                metrics::TASK_PANICS.inc();
                format!("handler panicked: {join_err}")
            }
            Err(join_err) => format!("handler did not complete: {join_err}"),
        };

        let retries_left = task
            .retries_left
            .unwrap_or(self.queue.max_retries)
            .saturating_sub(1);

        if retries_left == 0 {
            tracing::error!(
                kind = %kind,
                params = %task.params,
                error = %failure,
                "Task failed with no retries left, dropping"
            );
            self.settle(kind, Delivery::Exhausted);
            return;
        }

        let failed_attempts = self.queue.max_retries.saturating_sub(retries_left).max(1);
        let delay = self.config.backoff(failed_attempts);
        tracing::warn!(
            kind = %kind,
            retries_left,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Task failed, scheduling retry"
        );
        task.retries_left = Some(retries_left);
        metrics::record_task_outcome(kind.as_str(), Delivery::Retried.label());

        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    queue.requeue(task);
                }
                _ = cancel.cancelled() => {
                    tracing::debug!(kind = %kind, "Shutdown during backoff, dropping retry");
                    queue.finish_one();
                }
            }
        });
    }

    fn settle(&self, kind: TaskKind, outcome: Delivery) {
        metrics::record_task_outcome(kind.as_str(), outcome.label());
        self.queue.finish_one();
    }
}

/// Pulls tasks off the queue and runs them with bounded concurrency.
pub struct WorkerPool {
    ctx: Arc<PoolContext>,
    receiver: TaskReceiver,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(
        receiver: TaskReceiver,
        queue: TaskQueue,
        registry: HandlerRegistry,
        config: TaskConfig,
        cancel: CancellationToken,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            ctx: Arc::new(PoolContext {
                registry,
                queue,
                config,
                cancel,
            }),
            receiver,
            permits,
        }
    }

    /// Deliver tasks until the cancellation token fires or every queue handle
    /// is dropped, then wait for running handlers to finish.
    pub async fn run(self) {
        let Self {
            ctx,
            mut receiver,
            permits,
        } = self;
        let workers = ctx.config.workers.max(1);
        tracing::info!(
            workers,
            kinds = ?ctx.registry.kinds(),
            "Task worker pool started"
        );

        loop {
            let permit = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let task = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                task = receiver.0.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.deliver(task).await;
                drop(permit);
            });
        }

        // Drain: every permit back means no handler is still running.
        match permits.acquire_many(workers as u32).await {
            Ok(_) => tracing::info!("Task worker pool stopped"),
            Err(e) => tracing::warn!(error = %e, "Task worker pool stopped without draining"),
        }
    }
}
