// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Per-run stage status

use serde::Serialize;
use std::fmt;

use crate::errors::{ProxError, ProxResult};
use crate::pipeline::StageId;

/// Status of a stage within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Waiting for earlier stages
    Blocked,
    /// Ready to start
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not run (already completed or not applicable)
    Skipped,
}

impl StageStatus {
    /// Allowed moves of the per-run state machine
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        use StageStatus::*;

        matches!(
            (self, next),
            (Blocked, Pending)
                | (Blocked, Skipped)
                | (Pending, Running)
                | (Pending, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Blocked => "blocked",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Tracks one stage through a run
#[derive(Debug, Clone)]
pub struct StageRun {
    pub stage: StageId,
    status: StageStatus,
}

impl StageRun {
    pub fn new(stage: StageId, status: StageStatus) -> Self {
        Self { stage, status }
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    /// Move to `next`, rejecting moves the state machine does not allow
    pub fn advance(&mut self, next: StageStatus) -> ProxResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ProxError::InvalidTransition {
                stage: self.stage,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut run = StageRun::new(StageId::new(200), StageStatus::Blocked);
        run.advance(StageStatus::Pending).unwrap();
        run.advance(StageStatus::Running).unwrap();
        run.advance(StageStatus::Succeeded).unwrap();
        assert!(run.status().is_terminal());
    }

    #[test]
    fn test_cannot_run_while_blocked() {
        let mut run = StageRun::new(StageId::new(300), StageStatus::Blocked);
        let err = run.advance(StageStatus::Running).unwrap_err();
        assert!(matches!(err, ProxError::InvalidTransition { .. }));
        assert_eq!(run.status(), StageStatus::Blocked);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [StageStatus::Succeeded, StageStatus::Failed, StageStatus::Skipped] {
            for next in [
                StageStatus::Blocked,
                StageStatus::Pending,
                StageStatus::Running,
                StageStatus::Succeeded,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
