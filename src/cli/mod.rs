// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for proxk3s.

pub mod graph;
pub mod init;
pub mod inventory;
pub mod reset;
pub mod run;
pub mod setup;
pub mod status;
pub mod token;
pub mod validate;
pub mod watch;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::{ConfigLoader, LoadedConfig};
use crate::errors::ProxResult;
use crate::inventory::InventoryFormat;
use crate::layout::ProjectLayout;

/// k3s on Proxmox, one stage at a time
#[derive(Parser, Debug)]
#[clap(
    name = "proxk3s",
    version,
    about = "Generate an Ansible inventory from one cluster file and deploy k3s on Proxmox in ordered stages",
    long_about = None,
    after_help = "Examples:\n\
        proxk3s init                    Write config/cluster.template.yaml\n\
        proxk3s validate                Check config/cluster.yaml\n\
        proxk3s run                     Run every stage in order\n\
        proxk3s run --stage 0200        Run one stage\n\
        proxk3s status                  Show stage checkpoints\n\n\
        See 'proxk3s <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Cluster configuration file
    #[clap(long, global = true, env = "PROXK3S_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Inventory artifact path
    #[clap(long, global = true, env = "PROXK3S_INVENTORY", value_name = "FILE")]
    pub inventory: Option<PathBuf>,

    /// Checkpoint directory
    #[clap(long, global = true, env = "PROXK3S_STATE_DIR", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

impl Cli {
    /// Project paths relative to the working directory
    pub fn layout(&self) -> miette::Result<ProjectLayout> {
        let root = std::env::current_dir()
            .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

        Ok(ProjectLayout::new(root)
            .with_config(self.config.clone())
            .with_inventory(self.inventory.clone())
            .with_state_dir(self.state_dir.clone()))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the configuration template and project directories
    Init {
        /// Overwrite an existing template
        #[clap(long)]
        force: bool,

        /// Cluster name put into the template
        #[clap(long)]
        name: Option<String>,
    },

    /// Validate the cluster configuration
    Validate,

    /// Generate or print the Ansible inventory
    Inventory {
        /// Write here instead of the inventory artifact path
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Output format (yaml, json)
        #[clap(short, long, default_value = "yaml")]
        format: InventoryFormat,

        /// Print dynamic inventory JSON (Ansible `--list`)
        #[clap(long, conflicts_with_all = ["host", "check"])]
        list: bool,

        /// Print one host's variables as JSON (Ansible `--host`)
        #[clap(long, value_name = "NAME", conflicts_with = "check")]
        host: Option<String>,

        /// Fail if the artifact on disk differs from the configuration
        #[clap(long)]
        check: bool,
    },

    /// Run pipeline stages
    Run {
        /// Run only these stages (id or name, repeatable)
        #[clap(short, long, value_name = "ID")]
        stage: Vec<String>,

        /// Start the sequence at this stage
        #[clap(long, value_name = "ID", conflicts_with = "stage")]
        from: Option<String>,

        /// Stop the sequence after this stage
        #[clap(long, value_name = "ID", conflicts_with = "stage")]
        to: Option<String>,

        /// Dry run (show what would be done)
        #[clap(long)]
        dry_run: bool,
    },

    /// Show stage checkpoints
    Status,

    /// Show the stage dependency graph
    Graph {
        /// Output format (text, dot, mermaid)
        #[clap(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// Clear a stage checkpoint
    Reset {
        /// Stage id or name
        stage: String,

        /// Skip confirmation
        #[clap(short, long)]
        yes: bool,
    },

    /// Check the credential helper and the automation runtime
    Setup {
        /// Install the credential helper if it is missing
        #[clap(long)]
        install: bool,
    },

    /// Create the Proxmox automation user, API token and ACL
    Token(token::TokenArgs),

    /// Regenerate the inventory whenever the configuration changes
    Watch {
        /// Debounce delay in milliseconds
        #[clap(long, default_value = "500")]
        debounce: u64,
    },
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}

/// Load the configuration and print its warnings
pub(crate) fn load_config(layout: &ProjectLayout, verbose: bool) -> ProxResult<LoadedConfig> {
    let loaded = ConfigLoader::load(&layout.config)?;

    if !loaded.warnings.is_empty() && verbose {
        eprintln!("{}", "Configuration warnings:".yellow().bold());
        for warning in &loaded.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from(["proxk3s", "run", "--stage", "0200", "-s", "install-k3s", "--dry-run"]);
        match cli.command {
            Commands::Run { stage, dry_run, .. } => {
                assert_eq!(stage, vec!["0200", "install-k3s"]);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_from_conflicts_with_stage() {
        assert!(Cli::try_parse_from(["proxk3s", "run", "--stage", "0200", "--from", "0100"]).is_err());
    }
}
