// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Immutable context shared by every stage of a run

use crate::config::{ClusterConfig, LoadedConfig};
use crate::errors::ProxResult;
use crate::inventory::{Inventory, InventoryBuilder};
use crate::layout::ProjectLayout;
use crate::setup::Secret;

/// Configuration snapshot, inventory model, paths and token secret of one run
#[derive(Debug)]
pub struct RunContext {
    loaded: LoadedConfig,
    inventory: Inventory,
    layout: ProjectLayout,
    secret: Option<Secret>,
}

impl RunContext {
    /// Build the inventory model for a loaded configuration
    pub fn new(loaded: LoadedConfig, layout: ProjectLayout) -> ProxResult<Self> {
        let inventory = InventoryBuilder::build(&loaded.config)?;
        Ok(Self {
            loaded,
            inventory,
            layout,
            secret: None,
        })
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.loaded.config
    }

    /// Digest of the configuration bytes
    pub fn digest(&self) -> &str {
        &self.loaded.digest
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn secret(&self) -> Option<&Secret> {
        self.secret.as_ref()
    }
}
