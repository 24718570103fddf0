// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Error types with actionable messages
//!
//! Every failure names the offending field, host or stage and carries a
//! remediation hint, so the operator knows what to change before re-running.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::StageId;

/// Result type for proxk3s operations
pub type ProxResult<T> = Result<T, ProxError>;

/// Main error type for proxk3s
#[derive(Error, Debug, Diagnostic)]
pub enum ProxError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Configuration document not found: {path}")]
    #[diagnostic(code(proxk3s::config_not_found))]
    ConfigNotFound {
        path: PathBuf,
        #[help]
        help: Option<String>,
    },

    #[error("Configuration '{path}' is an unfilled template (placeholder at '{field}')")]
    #[diagnostic(
        code(proxk3s::unconfigured_template),
        help("Copy the template to config/cluster.yaml and replace every CHANGE_ME value")
    )]
    UnconfiguredTemplate { path: PathBuf, field: String },

    #[error("Invalid configuration at '{field}': expected {expected}")]
    #[diagnostic(code(proxk3s::config_schema))]
    ConfigSchemaError {
        field: String,
        expected: String,
        #[help]
        help: Option<String>,
    },

    #[error("Duplicate node identifier '{id}' (nodes[{first}] and nodes[{second}])")]
    #[diagnostic(
        code(proxk3s::duplicate_node_id),
        help("Node identifiers become inventory host names and must be unique; rename one of them")
    )]
    DuplicateNodeId {
        id: String,
        first: usize,
        second: usize,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Inventory Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Cannot emit {kind} name '{name}': {reason}")]
    #[diagnostic(
        code(proxk3s::emit_error),
        help("Rename the {kind} in the configuration document; names are never rewritten automatically")
    )]
    EmitError {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Inventory artifact is not readable: {reason}")]
    #[diagnostic(
        code(proxk3s::inventory_parse),
        help("Regenerate it with 'proxk3s inventory' instead of editing it by hand")
    )]
    InventoryParse { reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage {stage} cannot start: {precondition}")]
    #[diagnostic(code(proxk3s::precondition_unmet))]
    PreconditionUnmet {
        stage: StageId,
        precondition: String,
        #[help]
        help: Option<String>,
    },

    #[error("Stage {stage} ({name}) failed with exit code {exit_code}")]
    #[diagnostic(code(proxk3s::stage_failed))]
    StageExecutionFailed {
        stage: StageId,
        name: String,
        exit_code: i32,
        output: String,
        #[help]
        help: Option<String>,
    },

    #[error("Stage {stage} ({name}) already completed and must run only once")]
    #[diagnostic(
        code(proxk3s::already_completed),
        help("If the cluster really needs this stage again, clear its checkpoint with 'proxk3s reset {stage}'")
    )]
    AlreadyCompleted { stage: StageId, name: String },

    #[error("Stage {stage} ({name}) was interrupted during a previous run")]
    #[diagnostic(
        code(proxk3s::stage_interrupted),
        help("Inspect the cluster state, then clear the marker with 'proxk3s reset {stage}' and re-run")
    )]
    StageInterrupted { stage: StageId, name: String },

    #[error("Pipeline aborted while stage {stage} was running")]
    #[diagnostic(
        code(proxk3s::aborted),
        help("The stage was not marked complete; re-run it once the cause of the abort is resolved")
    )]
    Aborted { stage: StageId },

    #[error("Stage '{stage}' not found in the pipeline")]
    #[diagnostic(
        code(proxk3s::stage_not_found),
        help("Run 'proxk3s status' to list the known stage identifiers")
    )]
    StageNotFound { stage: String },

    #[error("Invalid stage registry: {reason}")]
    #[diagnostic(code(proxk3s::invalid_registry))]
    InvalidRegistry { reason: String },

    #[error("Stage {stage} cannot move from {from} to {to}")]
    #[diagnostic(code(proxk3s::invalid_transition))]
    InvalidTransition {
        stage: StageId,
        from: String,
        to: String,
    },

    #[error("No runner registered for '{runner}'")]
    #[diagnostic(
        code(proxk3s::runner_not_found),
        help("Available runners: inventory, ansible")
    )]
    RunnerNotFound { runner: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Setup Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Credential helper '{helper}' is not installed")]
    #[diagnostic(code(proxk3s::credential_helper_missing))]
    CredentialHelperMissing {
        helper: String,
        #[help]
        help: Option<String>,
    },

    #[error("Could not read secret '{reference}': {reason}")]
    #[diagnostic(
        code(proxk3s::secret_unavailable),
        help("Store it with '<helper> insert {reference}' or export PROXK3S_TOKEN_SECRET")
    )]
    SecretUnavailable { reference: String, reason: String },

    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(proxk3s::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    #[error("Tool '{tool}' execution failed: {error}")]
    #[diagnostic(code(proxk3s::tool_execution_failed))]
    ToolExecutionFailed {
        tool: String,
        error: String,
        #[help]
        help: Option<String>,
    },

    #[error("Proxmox token bootstrap failed: {reason}")]
    #[diagnostic(code(proxk3s::token_bootstrap))]
    TokenBootstrapFailed {
        reason: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // State Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Checkpoint error: {message}")]
    #[diagnostic(code(proxk3s::state_error))]
    StateError { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(proxk3s::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(proxk3s::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(proxk3s::io_error))]
    Io { message: String },

    #[error("YAML error: {message}")]
    #[diagnostic(code(proxk3s::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(proxk3s::json_error))]
    Json { message: String },
}

impl From<std::io::Error> for ProxError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ProxError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for ProxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl ProxError {
    /// Schema error for a field with no extra hint
    pub fn schema(field: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::ConfigSchemaError {
            field: field.into(),
            expected: expected.into(),
            help: None,
        }
    }

    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "ansible-playbook" => {
                "Install Ansible (pipx install ansible-core) and ensure ansible-playbook is in your PATH"
                    .to_string()
            }
            "ssh" => "Install an OpenSSH client".to_string(),
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Create a stage failure carrying the tail of the runner output
    pub fn stage_failed(stage: StageId, name: &str, exit_code: i32, output: &str) -> Self {
        let help = Self::help_for_runner_output(output).or_else(|| {
            Some(format!(
                "Fix the reported problem and re-run with 'proxk3s run --from {}'",
                stage
            ))
        });

        Self::StageExecutionFailed {
            stage,
            name: name.to_string(),
            exit_code,
            output: tail_lines(output, 40),
            help,
        }
    }

    /// Stage identifier the error refers to, if any
    pub fn stage(&self) -> Option<StageId> {
        match self {
            Self::PreconditionUnmet { stage, .. }
            | Self::StageExecutionFailed { stage, .. }
            | Self::AlreadyCompleted { stage, .. }
            | Self::StageInterrupted { stage, .. }
            | Self::Aborted { stage }
            | Self::InvalidTransition { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    fn help_for_runner_output(output: &str) -> Option<String> {
        // Common Ansible failure patterns
        if output.contains("UNREACHABLE!") {
            Some("A host was unreachable. Check that the VM is running and SSH accepts the configured user.".into())
        } else if output.contains("Permission denied (publickey") {
            Some("SSH key authentication failed. Check cluster.ssh.public_key_file and the VM's authorized keys.".into())
        } else if output.contains("401 Unauthorized") || output.contains("authentication failure") {
            Some("Proxmox rejected the API token. Verify proxmox.api_token_id and the stored secret.".into())
        } else if output.contains("couldn't resolve module") {
            Some("A required Ansible collection is missing. Install it with 'ansible-galaxy collection install community.general'.".into())
        } else {
            None
        }
    }
}

fn tail_lines(output: &str, max: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failed_keeps_output_tail() {
        let output: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let err = ProxError::stage_failed(StageId::new(300), "install-k3s", 2, &output);

        match err {
            ProxError::StageExecutionFailed { output, exit_code, .. } => {
                assert_eq!(exit_code, 2);
                assert!(output.starts_with("line 60"));
                assert!(output.ends_with("line 99"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_stage_failed_recognises_unreachable_host() {
        let err = ProxError::stage_failed(
            StageId::new(200),
            "preconfigure-vms",
            4,
            "fatal: [cp-1]: UNREACHABLE! => {}",
        );

        let ProxError::StageExecutionFailed { help, .. } = err else {
            panic!("expected StageExecutionFailed");
        };
        assert!(help.unwrap().contains("unreachable"));
    }

    #[test]
    fn test_error_reports_stage() {
        let err = ProxError::Aborted {
            stage: StageId::new(310),
        };
        assert_eq!(err.stage(), Some(StageId::new(310)));
        assert_eq!(ProxError::schema("nodes", "a list").stage(), None);
    }
}
