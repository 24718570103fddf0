// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Stage checkpoints
//!
//! A checkpoint records the latest attempt of a stage. Only a `completed`
//! checkpoint counts as done; it survives process exit and is only removed
//! by an explicit reset.

mod filesystem;

pub use filesystem::FilesystemCheckpoints;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::errors::ProxResult;
use crate::pipeline::StageId;

/// Outcome of the latest attempt of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Written before the stage's work starts
    InProgress,
    Completed,
    Failed,
    Aborted,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// Persisted record for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: StageId,
    pub status: CheckpointStatus,
    pub updated_at: SystemTime,
    /// Digest of the configuration the attempt ran against
    pub config_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Checkpoint {
    pub fn new(stage: StageId, status: CheckpointStatus, config_digest: &str) -> Self {
        Self {
            stage,
            status,
            updated_at: SystemTime::now(),
            config_digest: config_digest.to_string(),
            exit_code: None,
            message: None,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == CheckpointStatus::Completed
    }
}

/// Storage for stage checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint of a stage
    async fn get(&self, stage: StageId) -> ProxResult<Option<Checkpoint>>;

    /// Replace the checkpoint of a stage
    async fn record(&self, checkpoint: &Checkpoint) -> ProxResult<()>;

    /// Remove the checkpoint of a stage; returns whether one existed
    async fn clear(&self, stage: StageId) -> ProxResult<bool>;

    /// All checkpoints, ordered by stage
    async fn list(&self) -> ProxResult<Vec<Checkpoint>>;

    /// Whether a stage has a completed checkpoint
    async fn is_completed(&self, stage: StageId) -> ProxResult<bool> {
        Ok(self.get(stage).await?.is_some_and(|c| c.is_completed()))
    }
}
