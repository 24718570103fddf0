// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Inventory command - generate, print or check the Ansible inventory

use colored::Colorize;
use miette::Result;
use std::path::{Path, PathBuf};

use super::load_config;
use crate::errors::ProxError;
use crate::inventory::{InventoryBuilder, InventoryDocument, InventoryEmitter, InventoryFormat};
use crate::layout::ProjectLayout;

/// What the inventory command should do
#[derive(Debug, Clone)]
pub enum InventoryAction {
    /// Write the artifact
    Write {
        output: Option<PathBuf>,
        format: InventoryFormat,
    },
    /// Dynamic inventory `--list`
    List,
    /// Dynamic inventory `--host`
    Host(String),
    /// Compare the artifact on disk with the configuration
    Check,
}

/// Run the inventory command
pub async fn run(layout: &ProjectLayout, action: InventoryAction, verbose: bool) -> Result<()> {
    if let InventoryAction::Write { output, format } = &action {
        write_target(layout, output.as_deref(), *format)?;
    }

    let loaded = load_config(layout, verbose)?;
    let inventory = InventoryBuilder::build(&loaded.config)?;

    match action {
        InventoryAction::List => {
            println!("{}", InventoryEmitter::to_json(&inventory)?);
        }

        InventoryAction::Host(name) => {
            println!("{}", InventoryEmitter::host_vars_json(&inventory, &name)?);
        }

        InventoryAction::Check => {
            let path = &layout.inventory;
            let content = std::fs::read_to_string(path).map_err(|e| ProxError::FileReadError {
                path: path.clone(),
                error: e.to_string(),
            })?;

            let on_disk = InventoryDocument::from_yaml(&content)?;
            let expected = InventoryDocument::from_inventory(&inventory);

            if on_disk != expected {
                eprintln!("  {} {}", "✗".red(), path.display());
                for line in describe_drift(&on_disk, &expected) {
                    eprintln!("    {}", line);
                }
                return Err(miette::miette!(
                    help = "Regenerate it with 'proxk3s inventory'",
                    "{} is out of date with {}",
                    path.display(),
                    loaded.path.display()
                ));
            }

            println!("  {} {} is up to date", "✓".green(), path.display());
        }

        InventoryAction::Write { output, format } => {
            let path = write_target(layout, output.as_deref(), format)?;
            let changed = InventoryEmitter::write(&inventory, format, &path)?;

            let verb = if changed { "Wrote" } else { "Unchanged" };
            println!(
                "  {} {} {} ({} hosts, {} groups)",
                "✓".green(),
                verb,
                path.display(),
                inventory.hosts.len(),
                inventory.groups.len()
            );
        }
    }

    Ok(())
}

/// Where `inventory` writes; the pipeline's artifact only ever holds YAML
pub fn write_target(
    layout: &ProjectLayout,
    output: Option<&Path>,
    format: InventoryFormat,
) -> Result<PathBuf> {
    let path = output.map_or_else(|| layout.inventory.clone(), Path::to_path_buf);
    if format != InventoryFormat::Yaml && same_path(&path, &layout.inventory) {
        return Err(miette::miette!(
            help = "Pass -o FILE to write the JSON inventory elsewhere",
            "{} is read by the pipeline as YAML; refusing to write JSON there",
            path.display(),
        ));
    }
    Ok(path)
}

fn same_path(a: &Path, b: &Path) -> bool {
    let absolute = |p: &Path| std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf());
    absolute(a) == absolute(b)
}

/// Human-readable differences between two inventories
pub fn describe_drift(on_disk: &InventoryDocument, expected: &InventoryDocument) -> Vec<String> {
    let mut lines = Vec::new();

    for (group, members) in &expected.groups {
        match on_disk.groups.get(group) {
            None => lines.push(format!("group '{}' is missing", group)),
            Some(actual) if actual != members => lines.push(format!(
                "group '{}' lists [{}], expected [{}]",
                group,
                actual.join(", "),
                members.join(", ")
            )),
            Some(_) => {}
        }
    }
    for group in on_disk.groups.keys().filter(|g| !expected.groups.contains_key(*g)) {
        lines.push(format!("group '{}' is not in the configuration", group));
    }

    for (host, vars) in &expected.host_vars {
        match on_disk.host_vars.get(host) {
            None => lines.push(format!("host '{}' is missing", host)),
            Some(actual) if actual != vars => {
                lines.push(format!("host '{}' has different variables", host))
            }
            Some(_) => {}
        }
    }
    for host in on_disk.host_vars.keys().filter(|h| !expected.host_vars.contains_key(*h)) {
        lines.push(format!("host '{}' is not in the configuration", host));
    }

    if on_disk.group_vars != expected.group_vars {
        lines.push("group variables differ".to_string());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::fixtures;

    #[test]
    fn test_json_is_refused_for_the_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = ProjectLayout::new(dir.path());

        assert!(write_target(&layout, None, InventoryFormat::Json).is_err());
        let explicit = dir.path().join("inventory/hosts.yaml");
        assert!(write_target(&layout, Some(&explicit), InventoryFormat::Json).is_err());

        let elsewhere = dir.path().join("hosts.json");
        assert_eq!(
            write_target(&layout, Some(&elsewhere), InventoryFormat::Json).unwrap(),
            elsewhere
        );
        assert_eq!(
            write_target(&layout, None, InventoryFormat::Yaml).unwrap(),
            layout.inventory
        );
    }

    #[tokio::test]
    async fn test_refused_json_leaves_no_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let action = InventoryAction::Write {
            output: None,
            format: InventoryFormat::Json,
        };

        assert!(run(&layout, action, false).await.is_err());
        assert!(!layout.inventory.exists());
    }

    #[test]
    fn test_drift_lists_removed_host() {
        let config = fixtures::three_node_config();
        let inventory = InventoryBuilder::build(&config).unwrap();
        let expected = InventoryDocument::from_inventory(&inventory);

        let mut on_disk = expected.clone();
        assert!(describe_drift(&on_disk, &expected).is_empty());

        on_disk.host_vars.insert("ghost".into(), Default::default());
        let lines = describe_drift(&on_disk, &expected);
        assert_eq!(lines, vec!["host 'ghost' is not in the configuration".to_string()]);
    }
}
