// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Validate command - check the cluster configuration

use colored::Colorize;
use miette::Result;

use crate::config::ConfigLoader;
use crate::inventory::{InventoryBuilder, InventoryEmitter};
use crate::layout::ProjectLayout;
use crate::pipeline::{StageRegistry, StageTask};

/// Run the validate command
pub async fn run(layout: &ProjectLayout, verbose: bool) -> Result<()> {
    println!("{}", "Validating configuration...".bold());
    println!();

    let loaded = match ConfigLoader::load(&layout.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("  {} {}", "✗".red(), layout.config.display());
            eprintln!();
            return Err(e.into());
        }
    };
    println!("  {} {} matches the schema", "✓".green(), layout.config.display());

    let inventory = InventoryBuilder::build(&loaded.config)?;
    InventoryEmitter::check_tokens(&inventory)?;
    println!(
        "  {} Inventory builds ({} hosts, {} groups)",
        "✓".green(),
        inventory.hosts.len(),
        inventory.groups.len()
    );

    let missing: Vec<_> = StageRegistry::standard()
        .stages()
        .iter()
        .filter_map(|stage| match &stage.task {
            StageTask::Playbook(file) => Some(layout.playbook(file)),
            StageTask::GenerateInventory => None,
        })
        .filter(|path| !path.is_file())
        .collect();

    if !missing.is_empty() {
        println!();
        println!("{}:", "Missing playbooks".yellow().bold());
        for path in &missing {
            println!("  {} {}", "⚠".yellow(), path.display());
        }
    }

    if !loaded.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &loaded.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Cluster summary".bold());
        println!("  Name:   {}", loaded.config.cluster.name);
        println!("  Digest: {}", &loaded.digest[..12.min(loaded.digest.len())]);
        for group in &inventory.groups {
            println!("  {:<14} {}", group.name, group.members.join(", ").dimmed());
        }
    }

    println!();
    println!("{}", "Configuration is valid.".green().bold());

    Ok(())
}
