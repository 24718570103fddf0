// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Graph command - show the stage dependency graph

use miette::Result;

use super::GraphFormat;
use crate::pipeline::{StageGraph, StageRegistry};

/// Run the graph command
pub async fn run(format: GraphFormat, _verbose: bool) -> Result<()> {
    let registry = StageRegistry::standard();
    let graph = StageGraph::build(registry.stages())?;

    let output = match format {
        GraphFormat::Text => graph.to_text(),
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };

    print!("{}", output);

    Ok(())
}
