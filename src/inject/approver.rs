//! Batch approval with bounded retries.

use super::Services;
use crate::model::User;
use crate::model::user::PRODUCTION_MANAGER;
use crate::notify::Notification;
use crate::remote::CommandOutput;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

pub const APPROVAL_ATTEMPTS: u32 = 3;
pub const APPROVAL_RETRY_DELAY: Duration = Duration::from_secs(3);
/// Stdout marker of a failed approval.
pub const APPROVAL_FAILURE_MARKER: &str = "Something went wrong";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    pub results: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApprovalOutcome {
    fn ok() -> Self {
        Self {
            results: true,
            message: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            results: false,
            message: Some(message),
        }
    }
}

pub struct RequestApprover {
    batch_id: String,
    workflows: Vec<String>,
    services: Services,
    retry_delay: Duration,
}

impl RequestApprover {
    pub fn new(batch_id: impl Into<String>, workflows: Vec<String>, services: Services) -> Self {
        Self {
            batch_id: batch_id.into(),
            workflows,
            services,
            retry_delay: APPROVAL_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub async fn run(&self) -> ApprovalOutcome {
        let command = self
            .services
            .commands
            .approval_command(&self.batch_id, &self.workflows);

        let mut last = CommandOutput::default();
        for attempt in 1..=APPROVAL_ATTEMPTS {
            info!(batch_id = %self.batch_id, attempt, "approving workflows");
            let output = match self.services.executor.execute(&command).await {
                Ok(output) => output,
                Err(e) => {
                    let message = format!(
                        "Error while approving requests, batch id: {}, message: {e}",
                        self.batch_id
                    );
                    error!(batch_id = %self.batch_id, "{message}");
                    metrics::approval_attempts().add(1, &[KeyValue::new("result", "error")]);
                    self.notify_failure("", &message).await;
                    return ApprovalOutcome::failed(message);
                }
            };

            let stdout = output.stdout_text();
            info!(batch_id = %self.batch_id, %stdout, "approval output");
            if output.stderr.is_empty() && !stdout.contains(APPROVAL_FAILURE_MARKER) {
                metrics::approval_attempts().add(1, &[KeyValue::new("result", "ok")]);
                return ApprovalOutcome::ok();
            }

            last = output;
            if attempt < APPROVAL_ATTEMPTS {
                metrics::approval_attempts().add(1, &[KeyValue::new("result", "retry")]);
                warn!(batch_id = %self.batch_id, attempt, "approval failed, retrying");
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        metrics::approval_attempts().add(1, &[KeyValue::new("result", "failed")]);
        let stdout = last.stdout_text();
        let stderr = last.stderr_text();
        let detail = if stdout.contains(APPROVAL_FAILURE_MARKER) {
            &stdout
        } else {
            &stderr
        };
        let message = format!("Error in wmapprove: {detail}");
        error!(batch_id = %self.batch_id, "{message}");
        self.notify_failure(&stdout, &stderr).await;
        ApprovalOutcome::failed(message)
    }

    async fn notify_failure(&self, output: &str, error_output: &str) {
        let managers: Vec<User> = match self
            .services
            .repo
            .query("role", PRODUCTION_MANAGER)
            .await
        {
            Ok(users) => users,
            Err(e) => {
                error!(batch_id = %self.batch_id, "cannot look up production managers: {e}");
                Vec::new()
            }
        };
        let recipients = managers
            .iter()
            .map(User::email)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .collect();

        let body = format!(
            "Workflows: {}\nOutput:\n{output}\nError output: \n{error_output}",
            self.workflows.join(", ")
        );
        let notification = Notification::new(
            recipients,
            "There was an error while trying to approve workflows",
            body,
        );
        self.services.communicator.send(notification).await;
    }
}
