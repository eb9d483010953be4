//! Queues injection and approval jobs on the submission pool.
//!
//! Enqueueing a prepid takes its `{prepid}-queued` lock, so the same prepid
//! cannot wait in the queue twice; the job releases it when it ends.

use crate::engine::{QueuePolicy, Task, WorkerPool};
use crate::error::{Error, Result};
use crate::inject::{
    ApprovalOutcome, InjectionKind, InjectionOutcome, Injector, RequestApprover, Services,
};
use crate::notify::FlushReport;
use tokio::sync::oneshot;
use tracing::warn;

/// Result of a queued job, available once a worker has run it.
pub struct JobHandle<T> {
    name: String,
    state: HandleState<T>,
}

enum HandleState<T> {
    Ready(T),
    Pending(oneshot::Receiver<T>),
}

impl<T> JobHandle<T> {
    fn ready(name: String, value: T) -> Self {
        Self {
            name,
            state: HandleState::Ready(value),
        }
    }

    fn pending(name: String, rx: oneshot::Receiver<T>) -> Self {
        Self {
            name,
            state: HandleState::Pending(rx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the job. Fails only if the job died without reporting.
    pub async fn outcome(self) -> Result<T> {
        match self.state {
            HandleState::Ready(value) => Ok(value),
            HandleState::Pending(rx) => rx
                .await
                .map_err(|_| Error::Other(format!("job {} ended without an outcome", self.name))),
        }
    }
}

pub struct InjectionService {
    pool: WorkerPool,
    services: Services,
}

impl InjectionService {
    pub fn new(services: Services, workers: usize, policy: QueuePolicy) -> Self {
        Self {
            pool: WorkerPool::new("submission", workers, policy),
            services,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn enqueue_request(&self, prepid: &str) -> Result<JobHandle<InjectionOutcome>> {
        self.enqueue(InjectionKind::Request, prepid).await
    }

    pub async fn enqueue_chain(&self, prepid: &str) -> Result<JobHandle<InjectionOutcome>> {
        self.enqueue(InjectionKind::Chain, prepid).await
    }

    async fn enqueue(
        &self,
        kind: InjectionKind,
        prepid: &str,
    ) -> Result<JobHandle<InjectionOutcome>> {
        let Some(queued) = self
            .services
            .locker
            .lock(&format!("{prepid}-queued"))
            .try_acquire()
        else {
            warn!(prepid, "already queued for submission");
            return Ok(JobHandle::ready(
                prepid.to_string(),
                InjectionOutcome::Rejected {
                    prepid: prepid.to_string(),
                    message: format!("{prepid} is already queued for submission"),
                },
            ));
        };

        let injector = Injector::new(kind, prepid, self.services.clone()).with_queue_lock(queued);
        let (tx, rx) = oneshot::channel();
        let task = Task::new(format!("inject {} {prepid}", kind.as_str()), move || async move {
            let outcome = injector.run().await;
            let fatal = match &outcome {
                InjectionOutcome::PermissionDenied { message, .. } => Some(message.clone()),
                _ => None,
            };
            let _ = tx.send(outcome);
            match fatal {
                Some(message) => Err(anyhow::anyhow!(message)),
                None => Ok(()),
            }
        });

        self.pool.submit(task).await?;
        Ok(JobHandle::pending(prepid.to_string(), rx))
    }

    pub async fn approve_batch(
        &self,
        batch_id: &str,
        workflows: Vec<String>,
    ) -> Result<JobHandle<ApprovalOutcome>> {
        let approver = RequestApprover::new(batch_id, workflows, self.services.clone());
        let (tx, rx) = oneshot::channel();
        let task = Task::new(format!("approve {batch_id}"), move || async move {
            let _ = tx.send(approver.run().await);
            Ok(())
        });

        self.pool.submit(task).await?;
        Ok(JobHandle::pending(batch_id.to_string(), rx))
    }

    pub async fn flush_notifications(&self, min_count: usize) -> FlushReport {
        self.services.communicator.flush(min_count).await
    }

    pub async fn wait_completion(&self) {
        self.pool.wait_completion().await;
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}
