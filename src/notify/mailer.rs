//! Outgoing mail transport.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

/// A fully addressed message ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
}

impl Message {
    /// RFC 5322 text with headers, suitable for `sendmail -t`.
    pub fn to_rfc5322(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("From: {}\n", self.from));
        out.push_str(&format!("To: {}\n", self.to.join(", ")));
        if !self.cc.is_empty() {
            out.push_str(&format!("Cc: {}\n", self.cc.join(", ")));
        }
        out.push_str(&format!("Subject: {}\n", self.subject));
        out.push_str(&format!("Date: {}\n", Utc::now().to_rfc2822()));
        out.push_str(&format!("Message-ID: {}\n", self.id));
        if let Some(reply) = &self.in_reply_to {
            out.push_str(&format!("In-Reply-To: {reply}\nReferences: {reply}\n"));
        }
        out.push_str("Content-Type: text/plain; charset=utf-8\n\n");
        out.push_str(&self.body);
        out.push('\n');
        out
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Hands messages to a local `sendmail`-compatible binary.
#[derive(Debug, Clone)]
pub struct SendmailMailer {
    program: PathBuf,
}

impl SendmailMailer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Mailer for SendmailMailer {
    async fn send(&self, message: &Message) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(["-t", "-oi"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Other("sendmail has no stdin".to_string()))?;
        stdin.write_all(message.to_rfc5322().as_bytes()).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if output.status.success() {
            info!(subject = %message.subject, to = ?message.to, "mail handed to sendmail");
            Ok(())
        } else {
            Err(Error::Other(format!(
                "sendmail exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &Message) -> Result<()> {
        info!(
            id = %message.id,
            subject = %message.subject,
            to = ?message.to,
            body = %message.body,
            "mail not sent (log only)"
        );
        Ok(())
    }
}
