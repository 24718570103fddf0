// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Stage runners
//!
//! A runner performs the work of one stage. The pipeline picks the runner by
//! the stage task's runner name.

mod ansible;
mod inventory;

pub use ansible::{AnsibleRunner, SECRET_ENV, STAGE_ENV};
pub use inventory::InventoryRunner;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ProxResult;
use crate::pipeline::{RunContext, StageDescriptor};

/// Result of running a stage
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Whether the stage succeeded
    pub success: bool,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Exit code
    pub exit_code: i32,

    /// Files produced
    pub outputs: Vec<PathBuf>,

    /// Execution duration
    pub duration: Duration,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn success(stdout: String, duration: Duration, outputs: Vec<PathBuf>) -> Self {
        Self {
            success: true,
            stdout,
            stderr: String::new(),
            exit_code: 0,
            outputs,
            duration,
        }
    }

    /// Create a failed result
    pub fn failure(stderr: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr,
            exit_code,
            outputs: vec![],
            duration,
        }
    }

    /// Stdout followed by stderr
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Performs the work of a stage
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run a stage to completion
    ///
    /// A non-zero exit is an `Ok` result with `success == false`; `Err` means
    /// the work could not be started.
    async fn run(&self, stage: &StageDescriptor, ctx: &RunContext) -> ProxResult<ExecutionResult>;

    /// Check if the runner's tool is available
    async fn check_available(&self) -> ProxResult<bool>;

    /// Tool version
    async fn version(&self) -> ProxResult<String>;

    /// Check the stage can be handled before anything runs
    fn validate_stage(&self, stage: &StageDescriptor, ctx: &RunContext) -> ProxResult<()>;
}

/// The built-in runners keyed by runner name
pub fn create_default_runners() -> HashMap<String, Box<dyn StageRunner>> {
    let mut runners: HashMap<String, Box<dyn StageRunner>> = HashMap::new();
    runners.insert("inventory".to_string(), Box::new(InventoryRunner::new()));
    runners.insert("ansible".to_string(), Box::new(AnsibleRunner::new()));
    runners
}
