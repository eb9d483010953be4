//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The database URL is wrapped in secrecy::SecretString to prevent log leaks.

pub mod commands;

use crate::engine::QueuePolicy;
use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;

pub use commands::CommandSettings;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Host the injection and approval scripts run on.
    pub executor_host: String,
    pub submission_workers: usize,
    pub queue_policy: QueuePolicy,
    pub notify: NotifyConfig,
    pub sendmail_path: Option<PathBuf>,
    pub commands: CommandSettings,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// Settings for the notification coalescer.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Honour per-call accumulation requests.
    pub accumulate: bool,
    /// Accumulate every message regardless of the per-call flag.
    pub force_accumulate: bool,
    /// Service mailbox used as From/To/Cc on every outgoing message.
    pub service_address: String,
    pub subject_prefix: String,
    pub signature: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            accumulate: false,
            force_accumulate: false,
            service_address: "injector@localhost".to_string(),
            subject_prefix: "[Injector]".to_string(),
            signature: "Injection announcing service".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = NotifyConfig::default();
        let commands = match std::env::var("COMMAND_SETTINGS") {
            Ok(path) => CommandSettings::load(&PathBuf::from(path))?,
            Err(_) => CommandSettings::default(),
        };

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            executor_host: required_var("EXECUTOR_HOST")?,
            submission_workers: parsed_var("SUBMISSION_WORKERS")?.unwrap_or(5),
            queue_policy: queue_policy_from_env()?,
            notify: NotifyConfig {
                accumulate: flag_var("NOTIFY_ACCUMULATE")?,
                force_accumulate: flag_var("NOTIFY_FORCE_ACCUMULATE")?,
                service_address: std::env::var("NOTIFY_SERVICE_ADDRESS")
                    .unwrap_or(defaults.service_address),
                subject_prefix: std::env::var("NOTIFY_SUBJECT_PREFIX")
                    .unwrap_or(defaults.subject_prefix),
                signature: defaults.signature,
            },
            sendmail_path: std::env::var("SENDMAIL_PATH").ok().map(PathBuf::from),
            commands,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}

fn flag_var(name: &str) -> Result<bool> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(Error::Config(format!("{name} is not a boolean: {raw}"))),
        },
        Err(_) => Ok(false),
    }
}

/// `SUBMISSION_QUEUE_CAPACITY` bounds the queue; `SUBMISSION_QUEUE_POLICY`
/// picks what happens when it is full. No capacity means unbounded.
fn queue_policy_from_env() -> Result<QueuePolicy> {
    let Some(capacity) = parsed_var::<usize>("SUBMISSION_QUEUE_CAPACITY")? else {
        return Ok(QueuePolicy::Unbounded);
    };
    if capacity == 0 {
        return Err(Error::Config(
            "SUBMISSION_QUEUE_CAPACITY must be greater than zero".to_string(),
        ));
    }
    let policy = std::env::var("SUBMISSION_QUEUE_POLICY").unwrap_or_else(|_| "block".to_string());
    match policy.as_str() {
        "block" => Ok(QueuePolicy::Block { capacity }),
        "reject" => Ok(QueuePolicy::Reject { capacity }),
        other => Err(Error::Config(format!(
            "SUBMISSION_QUEUE_POLICY must be block or reject, got {other}"
        ))),
    }
}
