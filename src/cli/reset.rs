// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Reset command - clear a stage checkpoint

use colored::Colorize;
use miette::Result;
use std::io::{self, Write};

use crate::layout::ProjectLayout;
use crate::pipeline::StageRegistry;
use crate::state::{CheckpointStore, FilesystemCheckpoints};

/// Run the reset command
pub async fn run(layout: &ProjectLayout, stage: String, yes: bool, _verbose: bool) -> Result<()> {
    let registry = StageRegistry::standard();
    let id = registry.resolve(&stage)?;
    let store = FilesystemCheckpoints::new(layout.state_dir.clone());

    let Some(checkpoint) = store.get(id).await? else {
        println!("{}", format!("Stage {} has no checkpoint.", id).dimmed());
        return Ok(());
    };

    let name = registry.get(id).map(|s| s.name.as_str()).unwrap_or_default();

    if !yes {
        if registry.get(id).is_some_and(|s| s.is_run_once()) {
            println!(
                "{} {} ({}) is a run-once stage; resetting lets it run again.",
                "Warning:".yellow().bold(),
                id,
                name
            );
        }
        print!("Clear the {} checkpoint of stage {} ({})? [y/N] ", checkpoint.status, id, name);
        io::stdout().flush().ok();

        let mut input = String::new();
        io::stdin().read_line(&mut input).ok();

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", "Cancelled.".dimmed());
            return Ok(());
        }
    }

    store.clear(id).await?;
    println!("{}", format!("Checkpoint of stage {} cleared.", id).green());

    Ok(())
}
