// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Setup command - check the workstation before running the pipeline

use colored::Colorize;
use miette::Result;

use crate::config::{ConfigLoader, CredentialSettings};
use crate::errors::{ProxError, RecoverySuggestion};
use crate::layout::ProjectLayout;
use crate::runners::{AnsibleRunner, StageRunner};
use crate::setup::{
    check_tool, ensure_credential_helper, select_strategy, HelperStatus, ShowCommandHelper,
    RUNTIME_TOOL,
};

/// Run the setup command
pub async fn run(layout: &ProjectLayout, install: bool, verbose: bool) -> Result<()> {
    // The helper name comes from the configuration when one is usable
    let helper_name = ConfigLoader::load(&layout.config)
        .map(|l| l.config.credentials.helper)
        .unwrap_or_else(|_| CredentialSettings::default().helper);

    let helper = ShowCommandHelper::new(&helper_name);
    let strategy = select_strategy();

    println!("{}", "Checking workstation...".bold());
    println!();

    let mut problems: Vec<ProxError> = Vec::new();

    match ensure_credential_helper(&helper, strategy.as_ref(), install).await {
        Ok(HelperStatus::Present) => {
            println!("  {} Credential helper '{}' found", "✓".green(), helper_name);
        }
        Ok(HelperStatus::Installed) => {
            println!(
                "  {} Credential helper '{}' installed via {}",
                "✓".green(),
                helper_name,
                strategy.describe()
            );
        }
        Err(e) => {
            println!("  {} Credential helper '{}' missing", "✗".red(), helper_name);
            problems.push(e);
        }
    }

    match check_tool(RUNTIME_TOOL) {
        Ok(path) => {
            let runner = AnsibleRunner::new();
            let version = runner.version().await.unwrap_or_else(|_| "unknown".into());
            println!("  {} {} {}", "✓".green(), RUNTIME_TOOL, version.dimmed());
            if verbose {
                println!("      {}", path.display().to_string().dimmed());
            }
        }
        Err(e) => {
            println!("  {} {} not found", "✗".red(), RUNTIME_TOOL);
            println!();
            print!("{}", RecoverySuggestion::install_runtime());
            problems.push(e);
        }
    }

    match check_tool("ssh") {
        Ok(_) => println!("  {} ssh", "✓".green()),
        Err(_) => println!(
            "  {} ssh not found ({} needs it unless run with --local)",
            "⚠".yellow(),
            "proxk3s token".cyan()
        ),
    }

    println!();

    match problems.into_iter().next() {
        Some(e) => Err(e.into()),
        None => {
            println!("{}", "Workstation is ready.".green().bold());
            Ok(())
        }
    }
}
