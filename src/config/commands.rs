//! Settings for the scripts run on the execution host, loaded from TOML.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct CommandsFile {
    commands: CommandSettings,
}

/// Paths and endpoints the script builder needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Working directory on the execution host (trailing slash expected).
    pub work_location: String,
    /// Directory holding wmcontrol.py and wmapprove.py.
    pub wmcontrol_path: String,
    /// Public base URL the submission tool fetches request dictionaries from.
    pub base_url: String,
    /// Container image tag providing a recent python.
    pub python_release: String,
    /// Target the test instance of the workload manager.
    pub dev: bool,
    pub test_url: String,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            work_location: "/tmp/injector/".to_string(),
            wmcontrol_path: "/usr/local/wmcontrol".to_string(),
            base_url: "http://localhost/".to_string(),
            python_release: "el9:x86_64".to_string(),
            dev: true,
            test_url: "cmsweb-testbed.cern.ch".to_string(),
        }
    }
}

impl CommandSettings {
    /// Load a `[commands]` table from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read command settings {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad command settings {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str::<CommandsFile>(content).map(|file| file.commands)
    }
}
