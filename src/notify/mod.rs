//! Notification coalescer.
//!
//! Messages either go out at once, or (when accumulation is on) are folded
//! into a cache entry per (normalized subject, sender, recipients) and sent
//! in bulk by [`Communicator::flush`]. Subject words with exactly two
//! hyphens are treated as identifiers (`PPD-Run3-00001`) and dropped from
//! the key, so notices about different requests of the same kind collapse.

pub mod mailer;

pub use mailer::{LogMailer, Mailer, Message, SendmailMailer};

use crate::config::NotifyConfig;
use crate::locker::Locker;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use uuid::Uuid;

/// Named lock serializing accumulation and flushing.
pub const ACCUMULATION_LOCK: &str = "accumulating_notifications";

/// An outgoing notification. Built with the chained setters.
#[derive(Debug, Clone)]
pub struct Notification {
    recipients: Vec<String>,
    subject: String,
    body: String,
    sender: Option<String>,
    reply_to: Option<String>,
    accumulate: bool,
}

impl Notification {
    pub fn new(recipients: Vec<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipients,
            subject: subject.into(),
            body: body.into(),
            sender: None,
            reply_to: None,
            accumulate: false,
        }
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    pub fn accumulate(mut self, accumulate: bool) -> Self {
        self.accumulate = accumulate;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub text: String,
    pub count: usize,
}

/// What a flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
    pub kept: usize,
}

pub struct Communicator {
    mailer: Arc<dyn Mailer>,
    locker: Arc<Locker>,
    config: NotifyConfig,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl Communicator {
    pub fn new(mailer: Arc<dyn Mailer>, locker: Arc<Locker>, config: NotifyConfig) -> Self {
        Self {
            mailer,
            locker,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    /// Send or accumulate a notification. Returns the message id either way.
    pub async fn send(&self, notification: Notification) -> String {
        let id = self.message_id();
        let mut recipients = notification.recipients;
        recipients.sort();
        recipients.dedup();

        let sender = notification
            .sender
            .unwrap_or_else(|| self.config.service_address.clone());
        let subject = format!("{} {}", self.config.subject_prefix, notification.subject);

        if self.config.force_accumulate || (notification.accumulate && self.config.accumulate) {
            let _guard = self.locker.lock(ACCUMULATION_LOCK).acquire().await;
            let key = CacheKey {
                subject: normalize_subject(&subject),
                sender,
                recipients,
            };
            let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            cache
                .entry(key)
                .and_modify(|entry| {
                    entry.text.push_str("\n\n");
                    entry.text.push_str(&notification.body);
                    entry.count += 1;
                })
                .or_insert_with(|| CacheEntry {
                    text: notification.body.clone(),
                    count: 1,
                });
            metrics::notifications().add(1, &[KeyValue::new("action", "accumulated")]);
            return id;
        }

        let message = self.compose(
            id.clone(),
            sender,
            recipients,
            subject,
            &notification.body,
            notification.reply_to,
        );
        self.transmit(&message, "sent").await;
        id
    }

    /// Send every cached entry holding more than `min_count` messages and
    /// drop it from the cache. Entries that fail to send stay cached.
    pub async fn flush(&self, min_count: usize) -> FlushReport {
        let _guard = self.locker.lock(ACCUMULATION_LOCK).acquire().await;

        let due: Vec<(CacheKey, CacheEntry)> = {
            let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            let keys: Vec<CacheKey> = cache
                .iter()
                .filter(|(_, entry)| entry.count > min_count)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| cache.remove_entry(&key))
                .collect()
        };

        let mut report = FlushReport::default();
        let mut failed = Vec::new();
        for (key, entry) in due {
            let message = self.compose(
                self.message_id(),
                key.sender.clone(),
                key.recipients.clone(),
                key.subject.clone(),
                &entry.text,
                None,
            );
            if self.transmit(&message, "flushed").await {
                report.sent += 1;
            } else {
                report.failed += 1;
                failed.push((key, entry));
            }
        }

        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.extend(failed);
        report.kept = cache.len();
        info!(?report, min_count, "notification cache flushed");
        report
    }

    /// Snapshot of the accumulation cache.
    pub fn cached(&self) -> Vec<(CacheKey, CacheEntry)> {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn compose(
        &self,
        id: String,
        from: String,
        mut to: Vec<String>,
        subject: String,
        body: &str,
        in_reply_to: Option<String>,
    ) -> Message {
        let service = self.config.service_address.clone();
        if !to.contains(&service) {
            to.push(service.clone());
        }
        Message {
            id,
            from,
            to,
            cc: vec![service],
            subject,
            body: format!("{body}\n\n{}", self.config.signature),
            in_reply_to,
        }
    }

    async fn transmit(&self, message: &Message, action: &'static str) -> bool {
        info!(subject = %message.subject, to = ?message.to, "sending notification");
        match self.mailer.send(message).await {
            Ok(()) => {
                metrics::notifications().add(1, &[KeyValue::new("action", action)]);
                true
            }
            Err(e) => {
                error!(subject = %message.subject, "unable to send notification: {e}");
                metrics::notifications().add(1, &[KeyValue::new("action", "failed")]);
                false
            }
        }
    }

    fn message_id(&self) -> String {
        let domain = self
            .config
            .service_address
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("localhost");
        format!("<{}@{domain}>", Uuid::new_v4().simple())
    }
}

/// Drop words that look like identifiers (exactly two hyphens).
pub fn normalize_subject(subject: &str) -> String {
    subject
        .split_whitespace()
        .filter(|word| word.matches('-').count() != 2)
        .collect::<Vec<_>>()
        .join(" ")
}
