//! Typed views of the documents the orchestrator reads and advances.
//!
//! Each record exposes read accessors and a closed set of mutators
//! (approval, status, history, workflow references, chain position).
//! Fields the orchestrator does not own are carried through untouched.

pub mod batch;
pub mod chain;
pub mod request;
pub mod user;

pub use batch::{Batch, BatchStatus};
pub use chain::{ChainStatus, ChainedRequest};
pub use request::{Request, RequestManager};
pub use user::User;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A document that lives in one collection of the document store.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Approval
// ---------------------------------------------------------------------------

/// Approval steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    None,
    Validation,
    Define,
    Approve,
    Submit,
}

impl std::fmt::Display for Approval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Approval::None => "none",
            Approval::Validation => "validation",
            Approval::Define => "define",
            Approval::Approve => "approve",
            Approval::Submit => "submit",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Request statuses, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    New,
    Validation,
    Defined,
    Approved,
    Submitted,
    Done,
}

impl Status {
    pub const SEQUENCE: [Status; 6] = [
        Status::New,
        Status::Validation,
        Status::Defined,
        Status::Approved,
        Status::Submitted,
        Status::Done,
    ];

    /// The status after this one, if any.
    pub fn next(self) -> Option<Status> {
        let idx = Self::SEQUENCE.iter().position(|s| *s == self)?;
        Self::SEQUENCE.get(idx + 1).copied()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::New => "new",
            Status::Validation => "validation",
            Status::Defined => "defined",
            Status::Approved => "approved",
            Status::Submitted => "submitted",
            Status::Done => "done",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One entry in a document's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub updater: Updater,
}

/// Who made a change and when.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Updater {
    #[serde(default)]
    pub author_username: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub submission_date: String,
}

impl Updater {
    /// The orchestrator itself, stamped now.
    pub fn automatic() -> Self {
        Self {
            author_username: "automatic".to_string(),
            author_name: String::new(),
            author_email: String::new(),
            submission_date: Utc::now().format("%Y-%m-%d-%H-%M").to_string(),
        }
    }
}

impl HistoryEntry {
    pub fn new(action: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            step: step.into(),
            updater: Updater::automatic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_is_followed_by_submitted() {
        assert_eq!(Status::Approved.next(), Some(Status::Submitted));
        assert_eq!(Status::Done.next(), None);
    }

    #[test]
    fn approval_steps_are_ordered() {
        assert!(Approval::Approve < Approval::Submit);
        assert!(Approval::None < Approval::Validation);
    }
}
