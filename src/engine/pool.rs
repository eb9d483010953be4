//! Worker pool: N persistent workers draining one FIFO task queue.
//!
//! Workers live until the pool is shut down. A task that errors or panics is
//! logged here and never reaches the submitter or stops the worker.

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// A deferred unit of work. Arguments are captured by the closure.
pub struct Task {
    name: String,
    run: Box<dyn FnOnce() -> TaskFuture + Send + 'static>,
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move || Box::pin(f())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// Queue capacity and what `submit` does when it is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// No limit on the backlog.
    #[default]
    Unbounded,
    /// Bounded; `submit` waits for a free slot.
    Block { capacity: usize },
    /// Bounded; `submit` fails with [`Error::QueueFull`].
    Reject { capacity: usize },
}

enum QueueSender {
    Unbounded(mpsc::UnboundedSender<Task>),
    Bounded(mpsc::Sender<Task>),
}

enum QueueReceiver {
    Unbounded(mpsc::UnboundedReceiver<Task>),
    Bounded(mpsc::Receiver<Task>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Task> {
        match self {
            QueueReceiver::Unbounded(rx) => rx.recv().await,
            QueueReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}

#[derive(Default)]
struct PoolState {
    /// Submitted but not yet finished (queued + running).
    pending: AtomicUsize,
    running: AtomicUsize,
    idle: Notify,
}

impl PoolState {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Pool of tokio workers consuming tasks from a shared queue.
pub struct WorkerPool {
    name: String,
    policy: QueuePolicy,
    sender: Option<QueueSender>,
    state: Arc<PoolState>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` workers on the current runtime.
    pub fn new(name: impl Into<String>, workers: usize, policy: QueuePolicy) -> Self {
        let name = name.into();
        let (sender, receiver) = match policy {
            QueuePolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
            }
            QueuePolicy::Block { capacity } | QueuePolicy::Reject { capacity } => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
            }
        };

        let receiver = Arc::new(Mutex::new(receiver));
        let state = Arc::new(PoolState::default());
        let workers = (0..workers.max(1))
            .map(|i| {
                let worker = format!("{name}-{i}");
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&state),
                ))
            })
            .collect::<Vec<_>>();

        info!(pool = %name, workers = workers.len(), ?policy, "worker pool started");

        Self {
            name,
            policy,
            sender: Some(sender),
            state,
            workers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Enqueue a task. Only waits under [`QueuePolicy::Block`] with a full queue.
    pub async fn submit(&self, task: Task) -> Result<()> {
        let Some(sender) = &self.sender else {
            return Err(Error::Other(format!("pool {} is shut down", self.name)));
        };

        info!(
            pool = %self.name,
            task = task.name(),
            queued = self.queue_length(),
            "adding a task to the queue"
        );

        self.state.pending.fetch_add(1, Ordering::AcqRel);
        let sent = match (sender, self.policy) {
            (QueueSender::Unbounded(tx), _) => tx.send(task).map_err(|_| self.closed()),
            (QueueSender::Bounded(tx), QueuePolicy::Reject { capacity }) => {
                tx.try_send(task).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => Error::QueueFull { capacity },
                    mpsc::error::TrySendError::Closed(_) => self.closed(),
                })
            }
            (QueueSender::Bounded(tx), _) => tx.send(task).await.map_err(|_| self.closed()),
        };

        if let Err(e) = sent {
            warn!(pool = %self.name, error = %e, "task was not queued");
            self.state.finish_one();
            return Err(e);
        }
        Ok(())
    }

    fn closed(&self) -> Error {
        Error::Other(format!("pool {} has no running workers", self.name))
    }

    /// Tasks submitted but not yet picked up by a worker.
    pub fn queue_length(&self) -> usize {
        self.state
            .pending
            .load(Ordering::Acquire)
            .saturating_sub(self.state.running.load(Ordering::Acquire))
    }

    /// Tasks currently executing.
    pub fn running(&self) -> usize {
        self.state.running.load(Ordering::Acquire)
    }

    /// Wait until the queue is empty and every dequeued task has finished.
    pub async fn wait_completion(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Close the queue, let workers drain what is left, and join them.
    pub async fn shutdown(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!(pool = %self.name, "worker terminated abnormally: {e}");
            }
        }
        info!(pool = %self.name, "worker pool stopped");
    }
}

async fn worker_loop(worker: String, queue: Arc<Mutex<QueueReceiver>>, state: Arc<PoolState>) {
    loop {
        debug!(%worker, "worker trying to get work");
        let next = queue.lock().await.recv().await;
        let Some(task) = next else {
            debug!(%worker, "queue closed, worker exiting");
            return;
        };

        state.running.fetch_add(1, Ordering::AcqRel);
        let Task { name, run } = task;
        info!(%worker, task = %name, "worker acquired task");
        let start = Instant::now();

        // Run on its own tokio task so a panic is contained to this job.
        let result = match tokio::spawn(run()).await {
            Ok(Ok(())) => "ok",
            Ok(Err(e)) => {
                error!(%worker, task = %name, "task failed: {e:#}");
                "error"
            }
            Err(e) if e.is_panic() => {
                error!(%worker, task = %name, "task panicked: {e}");
                "panic"
            }
            Err(e) => {
                error!(%worker, task = %name, "task aborted: {e}");
                "aborted"
            }
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::pool_tasks().add(1, &[KeyValue::new("result", result)]);
        metrics::operation_duration_ms()
            .record(duration_ms, &[KeyValue::new("operation", "pool_task")]);
        debug!(%worker, task = %name, result, duration_ms, "task done");

        state.running.fetch_sub(1, Ordering::AcqRel);
        state.finish_one();
    }
}
