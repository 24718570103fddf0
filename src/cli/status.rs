// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Status command - show stage checkpoints

use colored::Colorize;
use miette::Result;
use std::time::SystemTime;

use crate::config::ConfigLoader;
use crate::layout::ProjectLayout;
use crate::pipeline::StageRegistry;
use crate::state::{CheckpointStatus, CheckpointStore, FilesystemCheckpoints};
use crate::utils::print_header;

/// Run the status command
pub async fn run(layout: &ProjectLayout, verbose: bool) -> Result<()> {
    let registry = StageRegistry::standard();
    let store = FilesystemCheckpoints::new(layout.state_dir.clone());
    // Status works without a configuration; drift is only reported when one loads
    let digest = ConfigLoader::load(&layout.config).ok().map(|l| l.digest);

    print_header("Pipeline status");

    for stage in registry.stages() {
        let checkpoint = store.get(stage.id).await?;

        let (glyph, label) = match checkpoint.as_ref().map(|c| c.status) {
            Some(CheckpointStatus::Completed) => ("✓".green(), "completed".green()),
            Some(CheckpointStatus::InProgress) => ("!".yellow(), "interrupted".yellow()),
            Some(CheckpointStatus::Failed) => ("✗".red(), "failed".red()),
            Some(CheckpointStatus::Aborted) => ("✗".yellow(), "aborted".yellow()),
            None => ("○".dimmed(), "not run".dimmed()),
        };

        print!(
            "  {} {} {:<20} {:<12}",
            glyph,
            stage.id,
            stage.name,
            label
        );

        if let Some(checkpoint) = &checkpoint {
            print!(" {}", ago(checkpoint.updated_at).dimmed());
            if let Some(code) = checkpoint.exit_code.filter(|c| *c != 0) {
                print!(" {}", format!("(exit code {})", code).dimmed());
            }
            if checkpoint.is_completed()
                && digest.as_deref().is_some_and(|d| d != checkpoint.config_digest)
            {
                print!(" {}", "(configuration changed since)".yellow());
            }
        }
        println!();

        if verbose {
            println!(
                "      {} {}",
                stage.idempotency.to_string().dimmed(),
                stage.purpose.dimmed()
            );
            if let Some(message) = checkpoint.as_ref().and_then(|c| c.message.as_deref()) {
                println!("      {}", message.dimmed());
            }
        }
    }

    println!();
    println!("  State: {}", store.state_dir().display().to_string().dimmed());

    Ok(())
}

fn ago(time: SystemTime) -> String {
    match time.elapsed() {
        Ok(elapsed) => format!("{} ago", format_duration(elapsed.as_secs())),
        Err(_) => "just now".to_string(),
    }
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(125), "2m");
        assert_eq!(format_duration(7200), "2h");
        assert_eq!(format_duration(90000), "1d");
    }
}
