// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Built-in inventory runner
//!
//! Writes the inventory artifact from the run's inventory model.

use async_trait::async_trait;
use std::time::Instant;

use super::{ExecutionResult, StageRunner};
use crate::errors::{ProxError, ProxResult};
use crate::inventory::{InventoryEmitter, InventoryFormat};
use crate::pipeline::{RunContext, StageDescriptor, StageTask};

/// Emits `inventory/hosts.yaml`
pub struct InventoryRunner;

impl InventoryRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InventoryRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageRunner for InventoryRunner {
    async fn run(&self, stage: &StageDescriptor, ctx: &RunContext) -> ProxResult<ExecutionResult> {
        self.validate_stage(stage, ctx)?;

        let start = Instant::now();
        let path = &ctx.layout().inventory;
        let changed = InventoryEmitter::write(ctx.inventory(), InventoryFormat::Yaml, path)?;

        let inventory = ctx.inventory();
        let summary = format!(
            "{} {} ({} hosts, {} groups)",
            if changed { "wrote" } else { "unchanged" },
            path.display(),
            inventory.hosts.len(),
            inventory.groups.len()
        );

        Ok(ExecutionResult::success(
            summary,
            start.elapsed(),
            vec![path.clone()],
        ))
    }

    async fn check_available(&self) -> ProxResult<bool> {
        Ok(true)
    }

    async fn version(&self) -> ProxResult<String> {
        Ok(format!("proxk3s {}", crate::VERSION))
    }

    fn validate_stage(&self, stage: &StageDescriptor, _ctx: &RunContext) -> ProxResult<()> {
        match stage.task {
            StageTask::GenerateInventory => Ok(()),
            StageTask::Playbook(_) => Err(ProxError::RunnerNotFound {
                runner: format!("inventory cannot run stage {}", stage.id),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadedConfig;
    use crate::inventory::{fixtures, InventoryDocument};
    use crate::layout::ProjectLayout;
    use crate::pipeline::StageRegistry;
    use tempfile::TempDir;

    fn context(root: &std::path::Path) -> RunContext {
        let loaded = LoadedConfig {
            config: fixtures::three_node_config(),
            path: root.join("config/cluster.yaml"),
            digest: "d".into(),
            warnings: vec![],
        };
        RunContext::new(loaded, ProjectLayout::new(root)).unwrap()
    }

    #[tokio::test]
    async fn test_writes_artifact() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let registry = StageRegistry::standard();
        let stage = registry.inventory_stage().unwrap();

        let result = InventoryRunner::new().run(stage, &ctx).await.unwrap();
        assert!(result.success);
        assert!(result.stdout.starts_with("wrote"));

        let written = std::fs::read_to_string(dir.path().join("inventory/hosts.yaml")).unwrap();
        let doc = InventoryDocument::from_yaml(&written).unwrap();
        assert_eq!(doc, InventoryDocument::from_inventory(ctx.inventory()));

        let again = InventoryRunner::new().run(stage, &ctx).await.unwrap();
        assert!(again.stdout.starts_with("unchanged"));
    }

    #[tokio::test]
    async fn test_rejects_playbook_stage() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let registry = StageRegistry::standard();
        let stage = &registry.stages()[1];

        assert!(InventoryRunner::new().run(stage, &ctx).await.is_err());
    }
}
