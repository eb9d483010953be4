//! Batches group the workflows injected under one submission identifier.

use super::{Document, HistoryEntry, RequestManager};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    New,
    Announced,
    Done,
    Reset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    prepid: String,
    #[serde(default)]
    status: BatchStatus,
    #[serde(default)]
    requests: Vec<RequestManager>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Document for Batch {
    const COLLECTION: &'static str = "batches";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Batch {
    pub fn new(prepid: impl Into<String>) -> Self {
        let prepid = prepid.into();
        Self {
            id: prepid.clone(),
            rev: None,
            prepid,
            status: BatchStatus::New,
            requests: Vec::new(),
            history: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn prepid(&self) -> &str {
        &self.prepid
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn requests(&self) -> &[RequestManager] {
        &self.requests
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn add_requests(&mut self, managers: impl IntoIterator<Item = RequestManager>) {
        self.requests.extend(managers);
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    pub fn with_status(mut self, status: BatchStatus) -> Self {
        self.status = status;
        self
    }
}
