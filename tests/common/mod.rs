//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use request_injector::config::{CommandSettings, NotifyConfig};
use request_injector::error::{Error, Result};
use request_injector::inject::{ConfigUploader, Services};
use request_injector::locker::Locker;
use request_injector::model::{Approval, HistoryEntry, Request, Status, Updater};
use request_injector::notify::{Communicator, Mailer, Message};
use request_injector::remote::{CommandOutput, RemoteExecutor};
use request_injector::scripts::CommandBuilder;
use request_injector::store::{DocumentStore, MemoryStore, Page, Repo};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays scripted outputs in order and records every command it was given.
/// Once the script runs out, the last entry repeats.
#[derive(Default)]
pub struct ScriptedExecutor {
    outputs: Mutex<VecDeque<Result<CommandOutput>>>,
    last: Mutex<Option<CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returning(outputs: Vec<CommandOutput>) -> Self {
        let executor = Self::new();
        executor
            .outputs
            .lock()
            .unwrap()
            .extend(outputs.into_iter().map(Ok));
        executor
    }

    pub fn failing(message: &str) -> Self {
        let executor = Self::new();
        executor
            .outputs
            .lock()
            .unwrap()
            .push_back(Err(Error::Remote(message.to_string())));
        executor
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.to_string());
        let next = self.outputs.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => {
                *self.last.lock().unwrap() = Some(output.clone());
                Ok(output)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().unwrap().clone().unwrap_or_default()),
        }
    }
}

pub fn stdout(text: &str) -> CommandOutput {
    CommandOutput::new(Some(0), text, "")
}

pub fn stderr(text: &str) -> CommandOutput {
    CommandOutput::new(Some(1), "", text)
}

/// Keeps every message instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Message>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broken() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &Message) -> Result<()> {
        if self.fail {
            return Err(Error::Other("mail relay is down".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Config uploader that succeeds (or not) without touching the channel.
pub struct StubUploader {
    succeed: bool,
    uploads: Mutex<Vec<String>>,
}

impl StubUploader {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigUploader for StubUploader {
    async fn upload(&self, prepid: &str) -> Result<bool> {
        self.uploads.lock().unwrap().push(prepid.to_string());
        Ok(self.succeed)
    }
}

/// Delegates to a [`MemoryStore`] but answers every update of the listed
/// ids with a revision conflict.
pub struct RefusingStore {
    inner: Arc<MemoryStore>,
    refused: Vec<String>,
}

#[async_trait]
impl DocumentStore for RefusingStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.inner.get(collection, id).await
    }

    async fn update(&self, collection: &str, doc: &Value) -> Result<bool> {
        let id = doc.get("_id").and_then(Value::as_str).unwrap_or_default();
        if self.refused.iter().any(|refused| refused == id) {
            return Ok(false);
        }
        self.inner.update(collection, doc).await
    }

    async fn create(&self, collection: &str, doc: &Value) -> Result<bool> {
        self.inner.create(collection, doc).await
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        self.inner.exists(collection, id).await
    }

    async fn query_by_index(
        &self,
        collection: &str,
        index: &str,
        key: &str,
        page: Page,
    ) -> Result<Vec<Value>> {
        self.inner.query_by_index(collection, index, key, page).await
    }
}

/// Everything a test needs to drive jobs and inspect what they did.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub mailer: Arc<RecordingMailer>,
    pub uploader: Arc<StubUploader>,
    pub locker: Arc<Locker>,
    pub services: Services,
}

impl Harness {
    pub fn new(executor: ScriptedExecutor) -> Self {
        Self::with_notify(executor, NotifyConfig::default())
    }

    pub fn with_notify(executor: ScriptedExecutor, notify: NotifyConfig) -> Self {
        Self::build(executor, notify, Vec::new())
    }

    /// Like [`Harness::new`], but saves of the listed documents are refused
    /// as revision conflicts.
    pub fn refusing_updates(executor: ScriptedExecutor, ids: &[&str]) -> Self {
        let ids = ids.iter().map(|id| id.to_string()).collect();
        Self::build(executor, NotifyConfig::default(), ids)
    }

    fn build(executor: ScriptedExecutor, notify: NotifyConfig, refused: Vec<String>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(executor);
        let mailer = Arc::new(RecordingMailer::new());
        let uploader = Arc::new(StubUploader::new(true));
        let locker = Arc::new(Locker::new());
        let communicator = Arc::new(Communicator::new(
            mailer.clone(),
            Arc::clone(&locker),
            notify,
        ));
        let backend: Arc<dyn DocumentStore> = if refused.is_empty() {
            store.clone()
        } else {
            Arc::new(RefusingStore {
                inner: store.clone(),
                refused,
            })
        };
        let services = Services::new(
            Repo::new(backend),
            executor.clone(),
            communicator,
            Arc::clone(&locker),
            CommandBuilder::new(CommandSettings::default()),
        )
        .with_uploader(uploader.clone());

        Self {
            store,
            executor,
            mailer,
            uploader,
            locker,
            services,
        }
    }

    pub fn repo(&self) -> Repo {
        self.services.repo.clone()
    }

    pub async fn request(&self, prepid: &str) -> Request {
        self.repo().get(prepid).await.unwrap()
    }
}

/// A request ready for injection, with one author in its history.
pub fn approved_request(prepid: &str, campaign: &str) -> Request {
    Request::new(prepid, campaign)
        .with_state(Approval::Approve, Status::Approved)
        .with_history(HistoryEntry {
            action: "created".into(),
            step: String::new(),
            updater: Updater {
                author_username: "jdoe".into(),
                author_email: "jdoe@example.org".into(),
                ..Updater::default()
            },
        })
}
