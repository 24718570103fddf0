// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Init command - write the configuration template

use colored::Colorize;
use miette::Result;
use std::path::Path;

use crate::config::PLACEHOLDER;
use crate::layout::ProjectLayout;

/// Run the init command
pub async fn run(layout: &ProjectLayout, force: bool, name: Option<String>, verbose: bool) -> Result<()> {
    let cluster_name = name.unwrap_or_else(|| {
        layout
            .root
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "homelab".to_string())
    });

    println!("{}", "Initializing proxk3s project...".bold());
    println!();

    let template = layout.template();
    if template.exists() && !force {
        return Err(miette::miette!(
            "{} already exists. Use --force to overwrite.",
            template.display()
        ));
    }

    let content = cluster_template(&cluster_name);
    write_file(&template, &content)?;
    println!("  {} Created {}", "✓".green(), relative(layout, &template));

    for dir in [&layout.playbooks, &layout.state_dir] {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| {
                miette::miette!("Failed to create directory '{}': {}", dir.display(), e)
            })?;
            println!("  {} Created {}/", "✓".green(), relative(layout, dir));
        }
    }
    if let Some(dir) = layout.inventory.parent().filter(|d| !d.exists()) {
        std::fs::create_dir_all(dir).map_err(|e| {
            miette::miette!("Failed to create directory '{}': {}", dir.display(), e)
        })?;
        println!("  {} Created {}/", "✓".green(), relative(layout, dir));
    }

    let gitignore = layout.root.join(".gitignore");
    if !gitignore.exists() {
        write_file(&gitignore, GITIGNORE)?;
        println!("  {} Created .gitignore", "✓".green());
    }

    println!();
    println!("{}", "Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  1. Copy the template: {}",
        format!("cp {} {}", relative(layout, &template), relative(layout, &layout.config)).cyan()
    );
    println!("  2. Replace every {} value and describe your nodes", PLACEHOLDER.cyan());
    println!("  3. Run {} to check it", "proxk3s validate".cyan());
    println!("  4. Run {} to check the workstation", "proxk3s setup".cyan());
    println!();

    if verbose {
        println!("{}", "Generated template:".dimmed());
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", content.dimmed());
    }

    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            miette::miette!("Failed to create directory '{}': {}", parent.display(), e)
        })?;
    }
    std::fs::write(path, content)
        .map_err(|e| miette::miette!("Failed to write {}: {}", path.display(), e))
}

fn relative(layout: &ProjectLayout, path: &Path) -> String {
    path.strip_prefix(&layout.root)
        .unwrap_or(path)
        .display()
        .to_string()
}

const GITIGNORE: &str = "# proxk3s\nconfig/cluster.yaml\ninventory/\n.proxk3s/\n";

/// Commented configuration template
pub fn cluster_template(name: &str) -> String {
    format!(
        r#"# proxk3s cluster configuration template
#
# Copy to config/cluster.yaml and replace every {ph} value.
# This file itself is never read by the pipeline.

version: "1"

cluster:
  name: "{name}"
  k3s_version: "v1.30.4+k3s1"
  network:
    cidr: "192.168.10.0/24"
    gateway: "192.168.10.1"
    dns: ["192.168.10.1", "1.1.1.1"]
    # Floating address for the Kubernetes API (optional)
    vip: "192.168.10.50"
    # Addresses handed out to LoadBalancer services (optional)
    load_balancer_range: "192.168.10.200-192.168.10.220"
  ssh:
    user: "ubuntu"
    public_key_file: "~/.ssh/id_ed25519.pub"

proxmox:
  api_host: "{ph}"
  api_user: "ansible@pve"
  api_token_id: "ansible@pve!ansible"
  # Entry in the credential helper holding the token secret
  # ('proxk3s token' creates the token and prints it once)
  api_token_secret_ref: "proxmox/ansible"
  validate_certs: false
  template_vmid: 9000
  storage: "local-lvm"
  bridge: "vmbr0"

credentials:
  helper: "pass"

nodes:
  - id: "cp-1"
    vmid: 201
    proxmox_node: "{ph}"
    roles: [control-plane]
    resources: {{ cores: 2, memory_mb: 4096, disk_gb: 32 }}
    network:
      address: "192.168.10.11"
  - id: "wk-1"
    vmid: 211
    proxmox_node: "{ph}"
    roles: [worker]
    resources: {{ cores: 4, memory_mb: 8192, disk_gb: 64 }}
    network:
      address: "192.168.10.21"
  - id: "wk-2"
    vmid: 212
    proxmox_node: "{ph}"
    roles: [worker, storage]
    resources: {{ cores: 4, memory_mb: 8192, disk_gb: 128 }}
    network:
      address: "192.168.10.22"

# Extra variables per group (keys: all or a role)
group_vars:
  all:
    timezone: "UTC"
"#,
        ph = PLACEHOLDER,
        name = name
    )
}
