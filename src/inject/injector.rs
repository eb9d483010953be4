//! The injection job.
//!
//! One run: take the approval gate and the per-prepid lock, resolve the
//! requests in scope, upload their configurations, submit them over the
//! remote channel under a batch id, and persist the created workflows.
//! Locks and the batch counter are released on every path.

use super::scope::Scope;
use super::{
    INJECTED_WORKFLOW_MARKER, InjectError, InjectionOutcome, InjectionState,
    PERMISSION_DENIED_MARKER, Services, parse_injected_workflows, preflight,
};
use crate::locker::{LockGuard, NamedLock};
use crate::model::{Approval, Batch, HistoryEntry, Request, RequestManager, Status};
use crate::notify::Notification;
use crate::telemetry::inject::{record_batch, record_state_transition, start_injection_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::time::Instant;
use tracing::{Instrument, Span, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionKind {
    /// A single request.
    Request,
    /// Every flagged chain a request belongs to, or one chain by id.
    Chain,
}

impl InjectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InjectionKind::Request => "request",
            InjectionKind::Chain => "chain",
        }
    }

    /// Collection the workload manager reads the request dictionary from.
    pub fn collection(self) -> &'static str {
        match self {
            InjectionKind::Request => "requests",
            InjectionKind::Chain => "chained_requests",
        }
    }
}

/// Tracks the job's state and mirrors transitions onto its span.
struct Progress {
    state: InjectionState,
    span: Span,
}

impl Progress {
    fn advance(&mut self, to: InjectionState) {
        if !self.state.can_transition_to(to) {
            warn!(from = %self.state, to = %to, "unexpected injection state transition");
        }
        record_state_transition(&self.span, self.state.as_str(), to.as_str());
        self.state = to;
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.advance(InjectionState::Failed);
        }
    }
}

pub struct Injector {
    kind: InjectionKind,
    prepid: String,
    services: Services,
    lock: Option<NamedLock>,
    queue_lock: Option<LockGuard>,
    check_approval: bool,
}

impl Injector {
    pub fn new(kind: InjectionKind, prepid: impl Into<String>, services: Services) -> Self {
        Self {
            kind,
            prepid: prepid.into(),
            services,
            lock: None,
            queue_lock: None,
            check_approval: true,
        }
    }

    pub fn request(prepid: impl Into<String>, services: Services) -> Self {
        Self::new(InjectionKind::Request, prepid, services)
    }

    pub fn chain(prepid: impl Into<String>, services: Services) -> Self {
        Self::new(InjectionKind::Chain, prepid, services)
    }

    /// Use a lock handed over by the caller instead of the prepid's own.
    pub fn with_lock(mut self, lock: NamedLock) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Guard taken when the job was queued; released when the job ends.
    pub fn with_queue_lock(mut self, guard: LockGuard) -> Self {
        self.queue_lock = Some(guard);
        self
    }

    /// Skip the `approval == approve` precondition. Status is still checked.
    pub fn check_approval(mut self, check: bool) -> Self {
        self.check_approval = check;
        self
    }

    pub fn prepid(&self) -> &str {
        &self.prepid
    }

    pub async fn run(mut self) -> InjectionOutcome {
        let span = start_injection_span(self.kind.as_str(), &self.prepid);
        let start = Instant::now();
        let mut progress = Progress {
            state: InjectionState::PendingApproval,
            span: span.clone(),
        };

        let outcome = self.gated(&mut progress).instrument(span).await;

        if let Some(queued) = self.queue_lock.take() {
            queued.release();
        }
        metrics::injections().add(
            1,
            &[
                KeyValue::new("kind", self.kind.as_str()),
                KeyValue::new("outcome", outcome.label()),
            ],
        );
        metrics::operation_duration_ms().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "injection")],
        );
        outcome
    }

    async fn gated(&self, progress: &mut Progress) -> InjectionOutcome {
        let gate = self
            .services
            .locker
            .lock(&format!("{}-wait-for-approval", self.prepid));
        let _gate = gate.acquire().await;
        info!(prepid = %self.prepid, kind = self.kind.as_str(), "injection started");

        let lock = self
            .lock
            .clone()
            .unwrap_or_else(|| self.services.locker.lock(&self.prepid));
        let Some(guard) = lock.try_acquire() else {
            let message = format!("The request with name {} is being handled already", self.prepid);
            error!(prepid = %self.prepid, "{message}");
            progress.fail();
            return InjectionOutcome::Rejected {
                prepid: self.prepid.clone(),
                message,
            };
        };
        progress.advance(InjectionState::LockAcquired);

        let outcome = self.locked(progress).await;
        if !outcome.results() {
            progress.fail();
        }

        info!(prepid = %self.prepid, "releasing lock");
        guard.release();
        outcome
    }

    async fn locked(&self, progress: &mut Progress) -> InjectionOutcome {
        let prepid = self.prepid.clone();

        let mut scope = match Scope::resolve(self.kind, &self.prepid, &self.services.repo).await {
            Ok(Some(scope)) => scope,
            Ok(None) => {
                info!(%prepid, "no chains ready for submission");
                return InjectionOutcome::Skipped {
                    prepid,
                    reason: "No chained requests are flagged for submission".to_string(),
                };
            }
            Err(e) => {
                error!(%prepid, "cannot resolve requests to inject: {e}");
                return InjectionOutcome::Failed {
                    message: format!("Problem with resolving {prepid}: {e}"),
                    prepid,
                };
            }
        };

        if let Err(e) = self.submit_configs(&mut scope).await {
            error!(%prepid, "config phase failed: {e}");
            return InjectionOutcome::Failed {
                message: format!("Problem with uploading the configuration for {prepid}: {e}"),
                prepid,
            };
        }
        info!(%prepid, "configs uploaded");
        progress.advance(InjectionState::ConfigsUploaded);

        match self.inject_configs(&scope, progress).await {
            Ok((batch_id, workflows)) => {
                info!(%prepid, %batch_id, ?workflows, "injected");
                progress.advance(InjectionState::Persisted);
                InjectionOutcome::Injected {
                    prepid,
                    batch_id,
                    workflows,
                }
            }
            Err(InjectError::PermissionDenied(stderr)) => {
                error!(%prepid, "permission denied on the execution host, rolling back");
                scope.roll_back(&self.services.repo).await;
                InjectionOutcome::PermissionDenied {
                    message: format!(
                        "Permission denied while injecting {prepid}; requests were set back to approve/approved: {}",
                        stderr.trim()
                    ),
                    prepid,
                }
            }
            Err(e) => {
                error!(%prepid, "injection failed: {e}");
                InjectionOutcome::Failed {
                    message: format!("Problem with injecting {prepid}: {e}"),
                    prepid,
                }
            }
        }
    }

    /// Check every request, then move each to `submit` and upload its
    /// configuration. Nothing is uploaded if any request is not ready.
    async fn submit_configs(&self, scope: &mut Scope) -> Result<(), InjectError> {
        for request in &scope.requests {
            let approval_ok = !self.check_approval || request.approval() == Approval::Approve;
            if !approval_ok || request.status() != Status::Approved {
                return Err(InjectError::Validation(format!(
                    "Request {} is in \"{}\"/\"{}\" approval/status, requires \"approve\"/\"approved\"",
                    request.prepid(),
                    request.approval(),
                    request.status()
                )));
            }
        }

        if let Some(first) = scope.requests.first() {
            preflight::check_collisions(&self.services.repo, first).await?;
        }

        for request in scope.requests.iter_mut() {
            let prepid = request.prepid().to_string();
            if request.approval() != Approval::Submit {
                request.set_approval(Approval::Submit);
                if !self.services.repo.update(&*request).await? {
                    return Err(InjectError::Persist(format!("Could not save request {prepid}")));
                }
                *request = self.services.repo.get::<Request>(&prepid).await?;
            }
            info!(%prepid, approval = %request.approval(), status = %request.status(), "set to submit");

            self.upload_config(&prepid).await?;
        }
        Ok(())
    }

    /// The injector's own prepid is already locked by this job; any other
    /// request needs its lock for the duration of the upload.
    async fn upload_config(&self, prepid: &str) -> Result<(), InjectError> {
        let _guard = if prepid == self.prepid {
            None
        } else {
            let guard = self.services.locker.lock(prepid).try_acquire().ok_or_else(|| {
                InjectError::Upload(format!("Could not acquire lock for config upload of {prepid}"))
            })?;
            Some(guard)
        };

        if self.services.uploader.upload(prepid).await? {
            Ok(())
        } else {
            Err(InjectError::Upload(format!(
                "Configuration upload failed for {prepid}"
            )))
        }
    }

    async fn inject_configs(
        &self,
        scope: &Scope,
        progress: &mut Progress,
    ) -> Result<(String, Vec<String>), InjectError> {
        let batch_id = self.services.batches.next_batch_id(&scope.batch_name).await?;
        record_batch(&progress.span, &batch_id);
        info!(prepid = %self.prepid, %batch_id, "got batch id");

        let ticket = self.services.locker.begin_batch(&batch_id).await;
        let result = self.submit_remote(scope, &batch_id, progress).await;
        ticket.release().await;
        result.map(|workflows| (batch_id, workflows))
    }

    async fn submit_remote(
        &self,
        scope: &Scope,
        batch_id: &str,
        progress: &mut Progress,
    ) -> Result<Vec<String>, InjectError> {
        let command = self
            .services
            .commands
            .injection_command(&self.prepid, self.kind.collection());
        let output = self
            .services
            .executor
            .execute(&command)
            .await
            .map_err(|e| InjectError::Remote(e.to_string()))?;
        progress.advance(InjectionState::RemoteSubmitted);

        let stdout = output.stdout_text();
        let stderr = output.stderr_text();
        if !stderr.is_empty() {
            error!(prepid = %self.prepid, %stderr, "error output from injection");
            if stderr.contains(PERMISSION_DENIED_MARKER) {
                return Err(InjectError::PermissionDenied(stderr));
            }
        }
        if !stdout.is_empty() {
            info!(prepid = %self.prepid, %stdout, "injection output");
        }

        if !stderr.is_empty() && stdout.is_empty() {
            self.notify(
                scope,
                format!("Request injection failed for {}", self.prepid),
                format!("Error in wmcontrol: {stderr}"),
            )
            .await;
            return Err(InjectError::Remote(format!("wmcontrol failed: {}", stderr.trim())));
        }

        let workflows = parse_injected_workflows(&stdout);
        if workflows.is_empty() {
            self.notify(
                scope,
                format!(
                    "Request injection happened but no request manager names for {}",
                    self.prepid
                ),
                format!(
                    "Injection has succeeded but no request manager names were registered. \
                     Check with administrators.\nOutput:\n{stdout}\n\nError:\n{stderr}"
                ),
            )
            .await;
            return Err(InjectError::Remote(format!(
                "no request manager names in the output (no \"{INJECTED_WORKFLOW_MARKER}\" lines)"
            )));
        }
        progress.advance(InjectionState::Parsed);

        self.update_batch(scope, batch_id, &workflows).await?;
        scope
            .record_success(self.kind, batch_id, &workflows, &self.services)
            .await?;
        Ok(workflows)
    }

    /// Add the created workflows to the batch document, under the batch lock.
    async fn update_batch(
        &self,
        scope: &Scope,
        batch_id: &str,
        workflows: &[String],
    ) -> Result<(), InjectError> {
        let added: Vec<RequestManager> = scope
            .requests
            .iter()
            .flat_map(|request| {
                workflows
                    .iter()
                    .map(move |wf| RequestManager::new(wf, request.prepid()))
            })
            .collect();

        let _guard = self.services.locker.lock(batch_id).acquire().await;
        let mut batch: Batch = self.services.repo.get(batch_id).await?;
        batch.add_requests(added);
        batch.push_history(HistoryEntry::new("updated", &scope.task_name));
        if !self.services.repo.update(&batch).await? {
            error!(%batch_id, "error saving batch");
            return Err(InjectError::Persist(format!("Could not save batch {batch_id}")));
        }
        Ok(())
    }

    /// Failure notices go out at once, to everyone who worked on the requests.
    async fn notify(&self, scope: &Scope, subject: String, body: String) {
        info!(prepid = %self.prepid, %subject, "notifying authors");
        let notification = Notification::new(scope.authors(), subject, body);
        self.services.communicator.send(notification).await;
    }
}
