//! Remote command channel.
//!
//! Each `execute` call opens its own session, pipes the script to a shell on
//! the execution host, and collects stdout/stderr. The child is killed if
//! the call is dropped, so no session outlives its caller.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// What a remote command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn new(status: Option<i32>, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> Result<CommandOutput>;
}

/// Runs scripts on a host over `ssh`, feeding the script on stdin.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    host: String,
    ssh: PathBuf,
    options: Vec<String>,
}

impl SshExecutor {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ssh: PathBuf::from("ssh"),
            options: vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "StrictHostKeyChecking=accept-new".to_string(),
            ],
        }
    }

    /// Use a different client binary (or a local shell wrapper in dev).
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.ssh = program.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(host = %self.host, bytes = command.len(), "opening remote session");

        let mut child = Command::new(&self.ssh)
            .args(&self.options)
            .arg(&self.host)
            .arg("bash -s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Remote(format!("cannot start {}: {e}", self.ssh.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Remote("remote session has no stdin".to_string()))?;
        // Feed the script while output is drained, so a chatty remote side
        // cannot stall on a full pipe before it has read everything.
        let script = command.to_string();
        let writer = tokio::spawn(async move {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(host = %self.host, "remote side stopped reading the script: {e}"),
            Err(e) => return Err(Error::Remote(format!("script writer failed: {e}"))),
        }
        let result = CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        };

        info!(
            host = %self.host,
            status = ?result.status,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "remote command finished"
        );
        Ok(result)
    }
}
