// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Proxmox node access
//!
//! Shell commands run either on the current host or on a Proxmox node over
//! SSH. Output of both streams is merged, as an operator would read it.

pub mod token;

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use crate::errors::{ProxError, ProxResult};

/// Exit code and merged output of a remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Where `pveum` commands run
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Human-readable target
    fn describe(&self) -> String;

    /// Run a shell command line
    async fn run(&self, command: &str) -> ProxResult<CommandOutput>;
}

/// Run on this machine (the operator is logged in to a Proxmox node)
pub struct LocalTransport;

#[async_trait]
impl CommandTransport for LocalTransport {
    fn describe(&self) -> String {
        "local host".to_string()
    }

    async fn run(&self, command: &str) -> ProxResult<CommandOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        collect("sh", cmd).await
    }
}

/// Run over `ssh` (batch mode, so a missing key fails instead of prompting)
pub struct SshTransport {
    host: String,
    user: String,
    port: u16,
    identity: Option<PathBuf>,
}

impl SshTransport {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            user: "root".to_string(),
            port: 22,
            identity: None,
        }
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity(mut self, identity: Option<PathBuf>) -> Self {
        self.identity = identity;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `ssh` arguments before the remote command
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=15".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{}", self.user, self.host));
        args
    }
}

#[async_trait]
impl CommandTransport for SshTransport {
    fn describe(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    async fn run(&self, command: &str) -> ProxResult<CommandOutput> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args()).arg("--").arg(command);
        collect("ssh", cmd).await
    }
}

async fn collect(tool: &str, mut cmd: Command) -> ProxResult<CommandOutput> {
    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProxError::tool_not_found(tool),
            _ => ProxError::ToolExecutionFailed {
                tool: tool.to_string(),
                error: e.to_string(),
                help: None,
            },
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CommandOutput {
        code: output.status.code().unwrap_or(-1),
        output: text,
    })
}
