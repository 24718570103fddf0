// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! proxk3s - k3s on Proxmox, one stage at a time
//!
//! Generate an Ansible inventory from one cluster file and deploy in ordered stages.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxk3s::cli::inventory::InventoryAction;
use proxk3s::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    proxk3s::utils::configure_colors();

    let default_filter = if cli.verbose { "proxk3s=debug" } else { "proxk3s=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let layout = cli.layout()?;
    let verbose = cli.verbose;

    // Dispatch to command handlers
    match cli.command {
        Commands::Init { force, name } => {
            proxk3s::cli::init::run(&layout, force, name, verbose).await
        }
        Commands::Validate => proxk3s::cli::validate::run(&layout, verbose).await,
        Commands::Inventory {
            output,
            format,
            list,
            host,
            check,
        } => {
            let action = if list {
                InventoryAction::List
            } else if let Some(host) = host {
                InventoryAction::Host(host)
            } else if check {
                InventoryAction::Check
            } else {
                InventoryAction::Write { output, format }
            };
            proxk3s::cli::inventory::run(&layout, action, verbose).await
        }
        Commands::Run {
            stage,
            from,
            to,
            dry_run,
        } => proxk3s::cli::run::run(&layout, stage, from, to, dry_run, verbose).await,
        Commands::Status => proxk3s::cli::status::run(&layout, verbose).await,
        Commands::Graph { format } => proxk3s::cli::graph::run(format, verbose).await,
        Commands::Reset { stage, yes } => {
            proxk3s::cli::reset::run(&layout, stage, yes, verbose).await
        }
        Commands::Setup { install } => proxk3s::cli::setup::run(&layout, install, verbose).await,
        Commands::Token(args) => proxk3s::cli::token::run(&layout, args, verbose).await,
        Commands::Watch { debounce } => {
            proxk3s::cli::watch::run(&layout, debounce, verbose).await
        }
    }
}
