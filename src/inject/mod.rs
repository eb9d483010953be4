//! Submission of approved requests to the workload manager.
//!
//! An [`Injector`] drives one request, or every submittable chain around a
//! request, through config upload, remote submission, and persistence of the
//! created workflows. [`RequestApprover`] moves injected workflows on once a
//! batch is announced.

pub mod approver;
pub mod batch;
pub mod config;
pub mod injector;
pub mod preflight;
mod scope;

pub use approver::{ApprovalOutcome, RequestApprover};
pub use batch::{BatchAllocator, StoreBatchAllocator};
pub use config::{ConfigUploader, RemoteConfigUploader};
pub use injector::{InjectionKind, Injector};

use crate::error::Error;
use crate::locker::Locker;
use crate::notify::Communicator;
use crate::remote::RemoteExecutor;
use crate::scripts::CommandBuilder;
use crate::store::Repo;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Stdout prefix of every line announcing a created workflow.
pub const INJECTED_WORKFLOW_MARKER: &str = "Injected workflow:";
/// Stderr marker of a home directory the service account cannot read.
pub const PERMISSION_DENIED_MARKER: &str = ".bashrc: Permission denied";

/// Collaborators shared by every job.
#[derive(Clone)]
pub struct Services {
    pub repo: Repo,
    pub executor: Arc<dyn RemoteExecutor>,
    pub communicator: Arc<Communicator>,
    pub locker: Arc<Locker>,
    pub batches: Arc<dyn BatchAllocator>,
    pub uploader: Arc<dyn ConfigUploader>,
    pub commands: Arc<CommandBuilder>,
}

impl Services {
    /// Wire the default allocator and uploader on top of the given store,
    /// channel, and coalescer.
    pub fn new(
        repo: Repo,
        executor: Arc<dyn RemoteExecutor>,
        communicator: Arc<Communicator>,
        locker: Arc<Locker>,
        commands: CommandBuilder,
    ) -> Self {
        let commands = Arc::new(commands);
        Self {
            batches: Arc::new(StoreBatchAllocator::new(repo.clone(), Arc::clone(&locker))),
            uploader: Arc::new(RemoteConfigUploader::new(
                Arc::clone(&executor),
                Arc::clone(&commands),
            )),
            repo,
            executor,
            communicator,
            locker,
            commands,
        }
    }

    pub fn with_allocator(mut self, batches: Arc<dyn BatchAllocator>) -> Self {
        self.batches = batches;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ConfigUploader>) -> Self {
        self.uploader = uploader;
        self
    }
}

/// How an injection job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    Injected {
        prepid: String,
        batch_id: String,
        workflows: Vec<String>,
    },
    /// Nothing to submit; not an error.
    Skipped { prepid: String, reason: String },
    /// Someone else is handling the same prepid.
    Rejected { prepid: String, message: String },
    Failed { prepid: String, message: String },
    /// The execution host refused the service account. Requests were
    /// rolled back to approve/approved before this was returned.
    PermissionDenied { prepid: String, message: String },
}

impl InjectionOutcome {
    pub fn prepid(&self) -> &str {
        match self {
            InjectionOutcome::Injected { prepid, .. }
            | InjectionOutcome::Skipped { prepid, .. }
            | InjectionOutcome::Rejected { prepid, .. }
            | InjectionOutcome::Failed { prepid, .. }
            | InjectionOutcome::PermissionDenied { prepid, .. } => prepid,
        }
    }

    pub fn results(&self) -> bool {
        matches!(
            self,
            InjectionOutcome::Injected { .. } | InjectionOutcome::Skipped { .. }
        )
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            InjectionOutcome::Injected { .. } => None,
            InjectionOutcome::Skipped { reason, .. } => Some(reason),
            InjectionOutcome::Rejected { message, .. }
            | InjectionOutcome::Failed { message, .. }
            | InjectionOutcome::PermissionDenied { message, .. } => Some(message),
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            InjectionOutcome::Injected { .. } => "injected",
            InjectionOutcome::Skipped { .. } => "skipped",
            InjectionOutcome::Rejected { .. } => "rejected",
            InjectionOutcome::Failed { .. } => "failed",
            InjectionOutcome::PermissionDenied { .. } => "permission_denied",
        }
    }

    pub fn report(&self) -> OutcomeReport {
        OutcomeReport {
            prepid: self.prepid().to_string(),
            results: self.results(),
            message: self.message().map(str::to_string),
        }
    }
}

/// Caller-facing `{prepid, results, message}` form of an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeReport {
    pub prepid: String,
    pub results: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Where an injection job is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionState {
    PendingApproval,
    LockAcquired,
    ConfigsUploaded,
    RemoteSubmitted,
    Parsed,
    Persisted,
    Failed,
}

impl InjectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            InjectionState::PendingApproval => "pending_approval",
            InjectionState::LockAcquired => "lock_acquired",
            InjectionState::ConfigsUploaded => "configs_uploaded",
            InjectionState::RemoteSubmitted => "remote_submitted",
            InjectionState::Parsed => "parsed",
            InjectionState::Persisted => "persisted",
            InjectionState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InjectionState::Persisted | InjectionState::Failed)
    }

    /// Forward by one step, or to `Failed` from any live state.
    pub fn can_transition_to(self, to: InjectionState) -> bool {
        use InjectionState::*;
        match (self, to) {
            (from, Failed) => !from.is_terminal(),
            (PendingApproval, LockAcquired)
            | (LockAcquired, ConfigsUploaded)
            | (ConfigsUploaded, RemoteSubmitted)
            | (RemoteSubmitted, Parsed)
            | (Parsed, Persisted) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for InjectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a phase of an injection job stopped.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Upload(String),

    #[error("{0}")]
    Remote(String),

    /// A revision-checked update was refused.
    #[error("{0}")]
    Persist(String),

    #[error("permission denied on the execution host: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Store(#[from] Error),
}

/// Workflow names announced on stdout: the last token of every line that
/// starts with [`INJECTED_WORKFLOW_MARKER`].
pub fn parse_injected_workflows(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.starts_with(INJECTED_WORKFLOW_MARKER))
        .filter_map(|line| line.split_whitespace().last())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_names_come_from_marked_lines() {
        assert_eq!(
            parse_injected_workflows("Injected workflow: wf-123\n"),
            vec!["wf-123"]
        );
        let stdout = "Preparing\nInjected workflow: pdmvserv_A_1\nnoise Injected workflow: x\nInjected workflow:   pdmvserv_B_2  \n";
        assert_eq!(
            parse_injected_workflows(stdout),
            vec!["pdmvserv_A_1", "pdmvserv_B_2"]
        );
        assert!(parse_injected_workflows("all good\n").is_empty());
    }

    #[test]
    fn states_move_forward_one_step_at_a_time() {
        use InjectionState::*;
        assert!(PendingApproval.can_transition_to(LockAcquired));
        assert!(!PendingApproval.can_transition_to(ConfigsUploaded));
        assert!(Parsed.can_transition_to(Failed));
        assert!(!Persisted.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(LockAcquired));
    }

    #[test]
    fn outcome_report_carries_results_and_message() {
        let outcome = InjectionOutcome::Rejected {
            prepid: "PPD-Run3-00001".into(),
            message: "busy".into(),
        };
        let json = serde_json::to_value(outcome.report()).unwrap();
        assert_eq!(json["results"], false);
        assert_eq!(json["message"], "busy");

        let ok = InjectionOutcome::Injected {
            prepid: "PPD-Run3-00001".into(),
            batch_id: "Run3-00001".into(),
            workflows: vec!["wf".into()],
        };
        let json = serde_json::to_value(ok.report()).unwrap();
        assert_eq!(json["results"], true);
        assert!(json.get("message").is_none());
    }
}
