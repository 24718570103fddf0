// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Watch command - regenerate the inventory when the configuration changes

use colored::Colorize;
use miette::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::path::Path;
use std::sync::mpsc::channel;
use std::time::Duration;

use crate::config::ConfigLoader;
use crate::inventory::{InventoryBuilder, InventoryEmitter, InventoryFormat};
use crate::layout::ProjectLayout;

/// Run the watch command
pub async fn run(layout: &ProjectLayout, debounce_ms: u64, verbose: bool) -> Result<()> {
    let watched = layout
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(layout.root.as_path())
        .to_path_buf();

    if !watched.is_dir() {
        return Err(miette::miette!(
            "Directory not found: {}\n\n\
             Run 'proxk3s init' to create a new project.",
            watched.display()
        ));
    }

    println!("{}", "Starting watch mode...".bold());
    println!(
        "Watching {} (debounce: {}ms)",
        layout.config.display(),
        debounce_ms
    );
    println!("Press {} to exit.", "Ctrl+C".cyan());
    println!();

    let (tx, rx) = channel();

    let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), tx)
        .map_err(|e| miette::miette!("Failed to create file watcher: {}", e))?;

    debouncer
        .watcher()
        .watch(&watched, RecursiveMode::NonRecursive)
        .map_err(|e| miette::miette!("Failed to start watching: {}", e))?;

    regenerate(layout, verbose);

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let relevant = events
                    .iter()
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .any(|e| is_config(&e.path, &layout.config));

                if relevant {
                    println!();
                    println!("{}", "─".repeat(50).dimmed());
                    println!("{}: {}", "Change detected".yellow(), layout.config.display());
                    regenerate(layout, verbose);
                }
            }
            Ok(Err(e)) => {
                eprintln!("{}: {:?}", "Watch error".red(), e);
            }
            Err(e) => {
                eprintln!("{}: {}", "Channel error".red(), e);
                break;
            }
        }
    }

    Ok(())
}

fn is_config(changed: &Path, config: &Path) -> bool {
    changed == config || (changed.file_name().is_some() && changed.file_name() == config.file_name())
}

/// Load, build and write; errors are printed and the watch goes on
fn regenerate(layout: &ProjectLayout, verbose: bool) {
    let start = std::time::Instant::now();

    let result = ConfigLoader::load(&layout.config).and_then(|loaded| {
        let inventory = InventoryBuilder::build(&loaded.config)?;
        let changed = InventoryEmitter::write(&inventory, InventoryFormat::Yaml, &layout.inventory)?;
        Ok((changed, inventory.hosts.len()))
    });

    match result {
        Ok((changed, hosts)) => {
            let verb = if changed { "Inventory regenerated" } else { "Inventory unchanged" };
            println!(
                "{} ({} hosts, {:.2}s)",
                verb.green(),
                hosts,
                start.elapsed().as_secs_f64()
            );
        }
        Err(e) => {
            eprintln!("{}: {}", "Inventory not written".red(), e);
            if verbose {
                eprintln!("{:?}", miette::Report::new(e));
            }
        }
    }
}
