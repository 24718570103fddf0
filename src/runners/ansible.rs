// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Ansible runner
//!
//! Runs a stage's playbook with `ansible-playbook` against the emitted
//! inventory.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use super::{ExecutionResult, StageRunner};
use crate::errors::{ProxError, ProxResult};
use crate::pipeline::{RunContext, StageDescriptor, StageTask};

/// Stage id passed to the playbook
pub const STAGE_ENV: &str = "PROXK3S_STAGE";
/// Token secret passed to the playbook
pub const SECRET_ENV: &str = "PROXMOX_API_TOKEN_SECRET";

/// Runs playbooks with `ansible-playbook`
pub struct AnsibleRunner {
    binary: String,
    extra_args: Vec<String>,
}

impl AnsibleRunner {
    pub fn new() -> Self {
        Self {
            binary: "ansible-playbook".to_string(),
            extra_args: Vec::new(),
        }
    }

    /// Use a different binary (wrapper scripts, virtualenvs)
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Extra arguments appended to every invocation
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn playbook_path(&self, stage: &StageDescriptor, ctx: &RunContext) -> ProxResult<PathBuf> {
        match &stage.task {
            StageTask::Playbook(file) => Ok(ctx.layout().playbook(file)),
            StageTask::GenerateInventory => Err(ProxError::RunnerNotFound {
                runner: format!("ansible cannot run stage {}", stage.id),
            }),
        }
    }

    /// Command line for a stage (without environment)
    pub fn command_line(&self, stage: &StageDescriptor, ctx: &RunContext) -> ProxResult<Vec<String>> {
        let playbook = self.playbook_path(stage, ctx)?;

        let mut args = vec![
            self.binary.clone(),
            "-i".to_string(),
            ctx.layout().inventory.display().to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(playbook.display().to_string());
        Ok(args)
    }
}

impl Default for AnsibleRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageRunner for AnsibleRunner {
    async fn run(&self, stage: &StageDescriptor, ctx: &RunContext) -> ProxResult<ExecutionResult> {
        self.validate_stage(stage, ctx)?;

        let args = self.command_line(stage, ctx)?;
        let start = Instant::now();

        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..])
            .current_dir(&ctx.layout().root)
            .env(STAGE_ENV, stage.id.to_string())
            .env("ANSIBLE_NOCOLOR", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(secret) = ctx.secret() {
            cmd.env(SECRET_ENV, secret.expose());
        }

        tracing::debug!(stage = %stage.id, command = %args.join(" "), "starting playbook");

        let output = cmd.output().await.map_err(|e| ProxError::ToolExecutionFailed {
            tool: self.binary.clone(),
            error: e.to_string(),
            help: Some("Check that Ansible is installed: 'proxk3s setup'".to_string()),
        })?;

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(ExecutionResult {
                success: true,
                stdout,
                stderr,
                exit_code: 0,
                outputs: vec![],
                duration,
            })
        } else {
            Ok(ExecutionResult {
                success: false,
                stdout,
                stderr,
                exit_code: output.status.code().unwrap_or(-1),
                outputs: vec![],
                duration,
            })
        }
    }

    async fn check_available(&self) -> ProxResult<bool> {
        Ok(which::which(&self.binary).is_ok())
    }

    async fn version(&self) -> ProxResult<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| ProxError::ToolExecutionFailed {
                tool: self.binary.clone(),
                error: e.to_string(),
                help: None,
            })?;

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or("unknown").trim().to_string())
    }

    fn validate_stage(&self, stage: &StageDescriptor, ctx: &RunContext) -> ProxResult<()> {
        let playbook = self.playbook_path(stage, ctx)?;
        if !playbook.is_file() {
            return Err(ProxError::FileReadError {
                path: playbook,
                error: format!("playbook for stage {} ({}) is missing", stage.id, stage.name),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadedConfig;
    use crate::inventory::fixtures;
    use crate::layout::ProjectLayout;
    use crate::pipeline::{StageId, StageRegistry};
    use crate::setup::Secret;
    use tempfile::TempDir;

    fn context(root: &std::path::Path) -> RunContext {
        let loaded = LoadedConfig {
            config: fixtures::three_node_config(),
            path: root.join("config/cluster.yaml"),
            digest: "d".into(),
            warnings: vec![],
        };
        RunContext::new(loaded, ProjectLayout::new(root))
            .unwrap()
            .with_secret(Secret::new("tok"))
    }

    #[test]
    fn test_command_line() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let registry = StageRegistry::standard();
        let stage = registry.get(StageId::new(300)).unwrap();

        let runner = AnsibleRunner::new().with_args(vec!["--diff".into()]);
        let args = runner.command_line(stage, &ctx).unwrap();

        assert_eq!(args[0], "ansible-playbook");
        assert_eq!(args[1], "-i");
        assert!(args[2].ends_with("inventory/hosts.yaml"));
        assert_eq!(args[3], "--diff");
        assert!(args[4].ends_with("playbooks/0300-install-k3s.yaml"));
    }

    #[test]
    fn test_missing_playbook_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let registry = StageRegistry::standard();
        let stage = registry.get(StageId::new(200)).unwrap();

        assert!(matches!(
            AnsibleRunner::new().validate_stage(stage, &ctx),
            Err(ProxError::FileReadError { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_binary_with_stage_environment() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("playbooks")).unwrap();
        std::fs::write(dir.path().join("playbooks/0200-preconfigure-vms.yaml"), "- hosts: all\n").unwrap();

        // Stand-in for ansible-playbook that echoes what it received
        let script = dir.path().join("fake-ansible");
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"stage=$PROXK3S_STAGE secret=$PROXMOX_API_TOKEN_SECRET args=$*\"\nexit 0\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ctx = context(dir.path());
        let registry = StageRegistry::standard();
        let stage = registry.get(StageId::new(200)).unwrap();

        let runner = AnsibleRunner::new().with_binary(script.display().to_string());
        let result = runner.run(stage, &ctx).await.unwrap();

        assert!(result.success);
        assert!(result.stdout.contains("stage=0200"));
        assert!(result.stdout.contains("secret=tok"));
        assert!(result.stdout.contains("0200-preconfigure-vms.yaml"));
    }
}
