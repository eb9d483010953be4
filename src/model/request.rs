//! Request documents.

use super::{Approval, Document, HistoryEntry, Status};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// A workflow created for a request by the workload manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestManager {
    pub name: String,
    #[serde(default)]
    pub content: RequestManagerContent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestManagerContent {
    #[serde(default)]
    pub pdmv_prep_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestManager {
    pub fn new(name: impl Into<String>, prepid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: RequestManagerContent {
                pdmv_prep_id: prepid.into(),
                extra: Map::new(),
            },
        }
    }
}

/// A simulation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    prepid: String,
    approval: Approval,
    status: Status,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(default)]
    reqmgr_name: Vec<RequestManager>,
    #[serde(default)]
    member_of_campaign: String,
    #[serde(default)]
    member_of_chain: Vec<String>,
    #[serde(default)]
    dataset_name: String,
    #[serde(default)]
    process_string: String,
    #[serde(default)]
    input_dataset: String,
    #[serde(default)]
    total_events: i64,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Document for Request {
    const COLLECTION: &'static str = "requests";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Request {
    /// A fresh request document, mostly for seeding stores.
    pub fn new(prepid: impl Into<String>, campaign: impl Into<String>) -> Self {
        let prepid = prepid.into();
        Self {
            id: prepid.clone(),
            rev: None,
            prepid,
            approval: Approval::None,
            status: Status::New,
            history: Vec::new(),
            reqmgr_name: Vec::new(),
            member_of_campaign: campaign.into(),
            member_of_chain: Vec::new(),
            dataset_name: String::new(),
            process_string: String::new(),
            input_dataset: String::new(),
            total_events: -1,
            extra: Map::new(),
        }
    }

    pub fn prepid(&self) -> &str {
        &self.prepid
    }

    pub fn approval(&self) -> Approval {
        self.approval
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn request_managers(&self) -> &[RequestManager] {
        &self.reqmgr_name
    }

    pub fn campaign(&self) -> &str {
        &self.member_of_campaign
    }

    pub fn chains(&self) -> &[String] {
        &self.member_of_chain
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn process_string(&self) -> &str {
        &self.process_string
    }

    pub fn input_dataset(&self) -> &str {
        &self.input_dataset
    }

    /// True when approval and status match the given pair.
    pub fn is_at(&self, approval: Approval, status: Status) -> bool {
        self.approval == approval && self.status == status
    }

    pub fn set_approval(&mut self, approval: Approval) {
        self.approval = approval;
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Move to the next status in the canonical sequence.
    pub fn advance_status(&mut self) -> Result<Status> {
        let next = self.status.next().ok_or_else(|| Error::InvalidTransition {
            from: self.status.to_string(),
            to: "<none>".to_string(),
        })?;
        self.status = next;
        Ok(next)
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    pub fn add_request_managers(&mut self, managers: impl IntoIterator<Item = RequestManager>) {
        self.reqmgr_name.extend(managers);
    }

    pub fn set_request_managers(&mut self, managers: Vec<RequestManager>) {
        self.reqmgr_name = managers;
    }

    pub fn with_dataset(mut self, dataset_name: &str, process_string: &str) -> Self {
        self.dataset_name = dataset_name.to_string();
        self.process_string = process_string.to_string();
        self
    }

    pub fn with_input_dataset(mut self, input_dataset: &str) -> Self {
        self.input_dataset = input_dataset.to_string();
        self
    }

    pub fn with_state(mut self, approval: Approval, status: Status) -> Self {
        self.approval = approval;
        self.status = status;
        self
    }

    pub fn with_history(mut self, entry: HistoryEntry) -> Self {
        self.history.push(entry);
        self
    }

    pub fn with_chain(mut self, chain: &str) -> Self {
        self.member_of_chain.push(chain.to_string());
        self
    }

    /// Distinct e-mail addresses of everyone who touched the request.
    pub fn author_emails(&self) -> Vec<String> {
        self.history
            .iter()
            .map(|h| h.updater.author_email.trim())
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Plain-text rendering used in notification bodies.
    pub fn textified(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "prepid: {}", self.prepid);
        let _ = writeln!(text, "campaign: {}", self.member_of_campaign);
        if !self.dataset_name.is_empty() {
            let _ = writeln!(text, "dataset name: {}", self.dataset_name);
        }
        if !self.process_string.is_empty() {
            let _ = writeln!(text, "process string: {}", self.process_string);
        }
        if !self.input_dataset.is_empty() {
            let _ = writeln!(text, "input dataset: {}", self.input_dataset);
        }
        let _ = writeln!(text, "approval/status: {}/{}", self.approval, self.status);
        if self.total_events >= 0 {
            let _ = writeln!(text, "total events: {}", self.total_events);
        }
        if !self.reqmgr_name.is_empty() {
            let _ = writeln!(text, "request manager names:");
            for manager in &self.reqmgr_name {
                let _ = writeln!(text, "  {}", manager.name);
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Updater;

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let doc = serde_json::json!({
            "_id": "PPD-Run3-00001",
            "_rev": "3",
            "prepid": "PPD-Run3-00001",
            "approval": "approve",
            "status": "approved",
            "member_of_campaign": "Run3",
            "sequences": [{"step": ["GEN"]}],
        });
        let req: Request = serde_json::from_value(doc).unwrap();
        assert!(req.is_at(Approval::Approve, Status::Approved));

        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["sequences"][0]["step"][0], "GEN");
        assert_eq!(back["_rev"], "3");
    }

    #[test]
    fn author_emails_are_distinct_and_sorted() {
        let mut req = Request::new("PPD-Run3-00001", "Run3");
        for email in ["b@example.org", "a@example.org", "b@example.org", ""] {
            req.push_history(HistoryEntry {
                action: "update".into(),
                step: String::new(),
                updater: Updater {
                    author_email: email.into(),
                    ..Updater::default()
                },
            });
        }
        assert_eq!(req.author_emails(), vec!["a@example.org", "b@example.org"]);
    }
}
