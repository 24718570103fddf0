// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! # proxk3s - k3s on Proxmox, one stage at a time
//!
//! `proxk3s` turns one declarative cluster document into an Ansible
//! inventory and drives an ordered pipeline of deployment stages against it.
//!
//! ## Features
//!
//! - **Inventory generation** - Static YAML or dynamic `--list` JSON, byte-stable
//! - **Ordered stages** - Four-digit identifiers, explicit preconditions
//! - **Run-once guarantees** - Checkpoints keep destructive stages from repeating
//! - **Workstation setup** - Credential helper and Ansible checks, token bootstrap
//!
//! ## Quick Start
//!
//! ```bash
//! # Write the configuration template
//! proxk3s init
//!
//! # Check the filled-in configuration
//! proxk3s validate
//!
//! # Run every stage in order
//! proxk3s run
//!
//! # Run one stage
//! proxk3s run --stage 0200
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod inventory;
pub mod layout;
pub mod pipeline;
pub mod proxmox;
pub mod runners;
pub mod setup;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use config::{ClusterConfig, ConfigLoader, LoadedConfig};
pub use errors::{ProxError, ProxResult};
pub use inventory::{Inventory, InventoryBuilder, InventoryEmitter};
pub use pipeline::{StageDescriptor, StageId, StageRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
