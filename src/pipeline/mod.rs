// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Deployment pipeline
//!
//! The ordered stage registry, its dependency graph, the per-run state
//! machine and the executor walking it.

mod context;
mod dag;
mod definition;
mod executor;
mod status;

pub use context::RunContext;
pub use dag::StageGraph;
pub use definition::*;
pub use executor::{ExecutionOptions, PipelineExecutor, PipelineReport, StageOutcome};
pub use status::{StageRun, StageStatus};
