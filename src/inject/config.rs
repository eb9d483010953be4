//! Configuration upload, the step before injection.

use crate::error::Result;
use crate::remote::RemoteExecutor;
use crate::scripts::CommandBuilder;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait ConfigUploader: Send + Sync {
    /// Build and upload the configuration of one request. `Ok(false)` means
    /// the upload ran and did not succeed.
    async fn upload(&self, prepid: &str) -> Result<bool>;
}

/// Uploads by running the upload script on the execution host.
pub struct RemoteConfigUploader {
    executor: Arc<dyn RemoteExecutor>,
    commands: Arc<CommandBuilder>,
}

impl RemoteConfigUploader {
    pub fn new(executor: Arc<dyn RemoteExecutor>, commands: Arc<CommandBuilder>) -> Self {
        Self { executor, commands }
    }
}

#[async_trait]
impl ConfigUploader for RemoteConfigUploader {
    async fn upload(&self, prepid: &str) -> Result<bool> {
        let command = self.commands.config_upload_command(prepid);
        let output = self.executor.execute(&command).await?;
        if output.success() {
            info!(prepid, "configuration uploaded");
            Ok(true)
        } else {
            warn!(
                prepid,
                status = ?output.status,
                stderr = %output.stderr_text(),
                "configuration upload failed"
            );
            Ok(false)
        }
    }
}
