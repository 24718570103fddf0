// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from errors.

use std::path::Path;

use super::ProxError;
use crate::pipeline::StageId;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Suggest creating the live configuration from its template
    pub fn copy_template(template: &Path, live: &Path) -> Self {
        Self {
            action: "Create the cluster configuration".into(),
            steps: vec![
                format!("{} does not exist yet", live.display()),
                "Copy the template and fill in every CHANGE_ME value".into(),
            ],
            commands: vec![
                format!("cp {} {}", template.display(), live.display()),
                format!("$EDITOR {}", live.display()),
                "proxk3s validate".into(),
            ],
        }
    }

    /// Suggest initialising a project from scratch
    pub fn init_project() -> Self {
        Self {
            action: "Initialise a proxk3s project".into(),
            steps: vec!["No configuration or template was found".into()],
            commands: vec![
                "proxk3s init".into(),
                "cp config/cluster.template.yaml config/cluster.yaml".into(),
            ],
        }
    }

    /// Suggest installing the credential helper
    pub fn install_credential_helper(helper: &str, install_command: Option<&str>) -> Self {
        let mut commands = vec!["# Let proxk3s pick the package manager:".into()];
        commands.push("proxk3s setup --install".into());
        if let Some(cmd) = install_command {
            commands.push(String::new());
            commands.push("# Or install it yourself:".into());
            commands.push(cmd.to_string());
        }

        Self {
            action: format!("Install the credential helper '{}'", helper),
            steps: vec![
                "Stages that talk to Proxmox read the API token secret through it".into(),
                "It must be installed before the pipeline starts".into(),
            ],
            commands,
        }
    }

    /// Suggest installing the automation runner
    pub fn install_runtime() -> Self {
        Self {
            action: "Install Ansible".into(),
            steps: vec!["ansible-playbook executes every stage after 0100".into()],
            commands: vec![
                "# Using pipx:".into(),
                "pipx install --include-deps ansible".into(),
                String::new(),
                "# Collections used by the playbooks:".into(),
                "ansible-galaxy collection install community.general".into(),
            ],
        }
    }

    /// Suggest running the stage a precondition waits on
    pub fn run_prerequisite(stage: StageId) -> Self {
        Self {
            action: format!("Run the stages before {}", stage),
            steps: vec![
                "Stages run in increasing order".into(),
                "Each stage needs the artifacts or checkpoints of earlier stages".into(),
            ],
            commands: vec![
                "proxk3s status".into(),
                format!("proxk3s run --to {}", stage),
            ],
        }
    }

    /// Suggest clearing a run-once checkpoint
    pub fn reset_stage(stage: StageId) -> Self {
        Self {
            action: format!("Clear the checkpoint of stage {}", stage),
            steps: vec![
                "Run-once stages are never repeated automatically".into(),
                "Only reset after checking the cluster by hand".into(),
            ],
            commands: vec![format!("proxk3s reset {}", stage)],
        }
    }

    /// Pick a suggestion for an error, if one applies
    pub fn for_error(error: &ProxError) -> Option<Self> {
        match error {
            ProxError::CredentialHelperMissing { helper, .. } => {
                Some(Self::install_credential_helper(helper, None))
            }
            ProxError::ToolNotFound { tool, .. } if tool == "ansible-playbook" => {
                Some(Self::install_runtime())
            }
            ProxError::PreconditionUnmet { stage, .. } => Some(Self::run_prerequisite(*stage)),
            ProxError::AlreadyCompleted { stage, .. }
            | ProxError::StageInterrupted { stage, .. } => Some(Self::reset_stage(*stage)),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
