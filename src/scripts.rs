//! Shell scripts executed on the execution host.
//!
//! The orchestrator only cares about what the scripts print; their exact
//! text lives here.

use crate::config::CommandSettings;
use uuid::Uuid;

const BIND_PATHS: &str = "export APPTAINER_BINDPATH='/afs,/cvmfs,/cvmfs/grid.cern.ch/etc/grid-security:/etc/grid-security,/eos,/etc/pki/ca-trust,/run/user,/var/run/user'";

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    settings: CommandSettings,
}

impl CommandBuilder {
    pub fn new(settings: CommandSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    fn test_params(&self) -> String {
        if self.settings.dev {
            format!("--wmtest --wmtesturl {}", self.settings.test_url)
        } else {
            String::new()
        }
    }

    /// Inject the request dictionary served for `prepid` from `collection`.
    pub fn injection_command(&self, prepid: &str, collection: &str) -> String {
        let dir = &self.settings.work_location;
        let proxy = format!("{dir}{prepid}_voms_proxy.txt");
        let script = format!("{dir}injection_script_{prepid}.sh");
        let dict_url = format!(
            "{}public/restapi/{collection}/get_dict/{prepid}",
            self.settings.base_url
        );

        [
            "#!/bin/bash".to_string(),
            BIND_PATHS.to_string(),
            format!("cd {dir}"),
            format!("voms-proxy-init --voms cms --out {proxy} --hours 4"),
            format!("export X509_USER_PROXY={proxy}"),
            format!("cat <<'EndOfInjectFile' > {script}"),
            "#!/bin/bash".to_string(),
            format!("cd {dir}"),
            format!("export PATH={}:${{PATH}}", self.settings.wmcontrol_path),
            format!(
                "python3 `which wmcontrol.py` --dont_approve --url-dict {dict_url} {}",
                self.test_params()
            ),
            "EndOfInjectFile".to_string(),
            format!("chmod +x {script}"),
            self.container_run(&script),
            format!("rm -f {script}"),
            format!("rm -f {proxy}"),
        ]
        .join("\n")
    }

    /// Move the given workflows to assignment-approved.
    pub fn approval_command(&self, batch_id: &str, workflows: &[String]) -> String {
        let proxy = format!("./{}_voms_proxy.txt", Uuid::new_v4().simple());
        let script = format!("./approve_{batch_id}_file.sh");

        [
            "#!/bin/bash".to_string(),
            BIND_PATHS.to_string(),
            "export APPROVE_FOLDER=$(mktemp -d -t 'Approve_XXXXXXXXXX')".to_string(),
            "cd $APPROVE_FOLDER/".to_string(),
            format!("voms-proxy-init --voms cms --out {proxy} --hours 1"),
            format!("cat <<'EndOfApproveFile' > {script}"),
            "#!/bin/bash".to_string(),
            format!("export X509_USER_PROXY={proxy}"),
            format!("export PATH={}:${{PATH}}", self.settings.wmcontrol_path),
            format!(
                "python3 `which wmapprove.py` --workflows {} {}",
                workflows.join(","),
                self.test_params()
            ),
            "EndOfApproveFile".to_string(),
            format!("chmod +x {script}"),
            self.container_run(&script),
            "rm -rf \"$APPROVE_FOLDER\"".to_string(),
        ]
        .join("\n")
    }

    /// Build and upload the configuration files of one request.
    pub fn config_upload_command(&self, prepid: &str) -> String {
        let dir = &self.settings.work_location;
        [
            "#!/bin/bash".to_string(),
            BIND_PATHS.to_string(),
            format!("cd {dir}"),
            format!(
                "curl -s -k -L -o config_{prepid}.sh {}public/restapi/requests/get_setup/{prepid}",
                self.settings.base_url
            ),
            format!("bash config_{prepid}.sh --upload"),
            format!("rm -f config_{prepid}.sh"),
        ]
        .join("\n")
    }

    fn container_run(&self, script: &str) -> String {
        format!(
            "singularity run --home $PWD:$PWD /cvmfs/unpacked.cern.ch/registry.hub.docker.com/cmssw/{} {script}",
            self.settings.python_release
        )
    }
}
