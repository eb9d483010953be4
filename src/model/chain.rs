//! Chained request documents: an ordered list of request prepids that
//! process one dataset step after step.

use super::{Document, HistoryEntry, Status};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    #[default]
    New,
    Processing,
    Done,
    ForceDone,
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChainStatus::New => "new",
            ChainStatus::Processing => "processing",
            ChainStatus::Done => "done",
            ChainStatus::ForceDone => "force_done",
        };
        write!(f, "{s}")
    }
}

/// Per-chain knobs set by operators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParameters {
    /// The chain may be submitted.
    #[serde(default)]
    pub flag: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedRequest {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    prepid: String,
    #[serde(default)]
    chain: Vec<String>,
    #[serde(default)]
    step: usize,
    #[serde(default)]
    status: ChainStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_status: Option<Status>,
    #[serde(default)]
    action_parameters: ActionParameters,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Document for ChainedRequest {
    const COLLECTION: &'static str = "chained_requests";

    fn id(&self) -> &str {
        &self.id
    }
}

impl ChainedRequest {
    pub fn new(prepid: impl Into<String>, chain: Vec<String>) -> Self {
        let prepid = prepid.into();
        Self {
            id: prepid.clone(),
            rev: None,
            prepid,
            chain,
            step: 0,
            status: ChainStatus::New,
            last_status: None,
            action_parameters: ActionParameters::default(),
            history: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn prepid(&self) -> &str {
        &self.prepid
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn status(&self) -> ChainStatus {
        self.status
    }

    pub fn last_status(&self) -> Option<Status> {
        self.last_status
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Whether operators allowed this chain to be submitted.
    pub fn is_flagged(&self) -> bool {
        self.action_parameters.flag
    }

    /// Prepid of the request at the current step.
    pub fn current_request(&self) -> Option<&str> {
        self.chain.get(self.step).map(String::as_str)
    }

    /// Requests from the current step to the end of the chain.
    pub fn remaining(&self) -> &[String] {
        self.chain.get(self.step..).unwrap_or_default()
    }

    pub fn contains(&self, prepid: &str) -> bool {
        self.chain.iter().any(|p| p == prepid)
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Record that everything up to the last step has been handed over.
    pub fn mark_injected(&mut self, last_status: Option<Status>) {
        self.step = self.chain.len().saturating_sub(1);
        self.status = ChainStatus::Processing;
        if last_status.is_some() {
            self.last_status = last_status;
        }
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_flag(mut self, flag: bool) -> Self {
        self.action_parameters.flag = flag;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_starts_at_current_step() {
        let chain = ChainedRequest::new(
            "chain_Run3_flowA-00001",
            vec!["A-1".into(), "B-1".into(), "C-1".into()],
        )
        .with_step(1);
        assert_eq!(chain.current_request(), Some("B-1"));
        assert_eq!(chain.remaining(), ["B-1", "C-1"]);
    }

    #[test]
    fn step_past_the_end_leaves_nothing() {
        let chain = ChainedRequest::new("c", vec!["A-1".into()]).with_step(4);
        assert!(chain.remaining().is_empty());
        assert_eq!(chain.current_request(), None);
    }
}
