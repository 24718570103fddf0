// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Filesystem checkpoint store
//!
//! One JSON file per stage (`<state-dir>/<id>.json`). Writes go through a
//! temporary file and a rename so a crash never leaves a torn record.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{Checkpoint, CheckpointStore};
use crate::errors::{ProxError, ProxResult};
use crate::pipeline::StageId;

/// Checkpoints stored as JSON files
pub struct FilesystemCheckpoints {
    state_dir: PathBuf,
}

impl FilesystemCheckpoints {
    /// Store rooted at `state_dir` (created on first write)
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn path(&self, stage: StageId) -> PathBuf {
        self.state_dir.join(format!("{}.json", stage))
    }

    async fn read(&self, path: &Path) -> ProxResult<Checkpoint> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| state_error(path, "read", e))?;

        serde_json::from_str(&content).map_err(|e| ProxError::StateError {
            message: format!("corrupt checkpoint {}: {}", path.display(), e),
        })
    }
}

#[async_trait]
impl CheckpointStore for FilesystemCheckpoints {
    async fn get(&self, stage: StageId) -> ProxResult<Option<Checkpoint>> {
        let path = self.path(stage);
        if !path.exists() {
            return Ok(None);
        }
        self.read(&path).await.map(Some)
    }

    async fn record(&self, checkpoint: &Checkpoint) -> ProxResult<()> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| state_error(&self.state_dir, "create", e))?;

        let path = self.path(checkpoint.stage);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(checkpoint)?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| state_error(&tmp, "write", e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| state_error(&path, "replace", e))?;

        tracing::debug!(stage = %checkpoint.stage, status = %checkpoint.status, "checkpoint recorded");
        Ok(())
    }

    async fn clear(&self, stage: StageId) -> ProxResult<bool> {
        let path = self.path(stage);
        if !path.exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| state_error(&path, "remove", e))?;
        Ok(true)
    }

    async fn list(&self) -> ProxResult<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();
        if !self.state_dir.exists() {
            return Ok(checkpoints);
        }

        let mut entries = tokio::fs::read_dir(&self.state_dir)
            .await
            .map_err(|e| state_error(&self.state_dir, "read", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| state_error(&self.state_dir, "read", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            checkpoints.push(self.read(&path).await?);
        }

        checkpoints.sort_by_key(|c| c.stage);
        Ok(checkpoints)
    }
}

fn state_error(path: &Path, action: &str, error: std::io::Error) -> ProxError {
    ProxError::StateError {
        message: format!("failed to {} {}: {}", action, path.display(), error),
    }
}
