// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Pipeline stage definitions
//!
//! Stages are static descriptors ordered by a typed sequence key. Each one
//! declares what must hold before it may start and whether it is safe to
//! repeat.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::Role;
use crate::errors::{ProxError, ProxResult};
use crate::pipeline::StageGraph;

/// Sequence key of a stage, rendered as four digits (`0300`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageId(u16);

impl StageId {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.len() > 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("'{}' is not a stage id like 0200", s));
        }
        s.parse::<u16>()
            .map(Self)
            .map_err(|e| format!("'{}' is not a stage id: {}", s, e))
    }
}

impl TryFrom<String> for StageId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StageId> for String {
    fn from(id: StageId) -> Self {
        id.to_string()
    }
}

/// Whether a stage may be repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Idempotency {
    /// Repeating only overwrites the stage's own artifact
    SafeToRerun,
    /// Repeating would be destructive; completion is checkpointed
    RunOnce,
}

impl fmt::Display for Idempotency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SafeToRerun => write!(f, "safe-to-rerun"),
            Self::RunOnce => write!(f, "run-once"),
        }
    }
}

/// Condition that must hold before a stage starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The inventory artifact exists and is not empty
    InventoryArtifact,
    /// Another stage has a `completed` checkpoint
    StageCompleted(StageId),
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InventoryArtifact => write!(f, "inventory artifact exists and is not empty"),
            Self::StageCompleted(id) => write!(f, "stage {} has completed", id),
        }
    }
}

/// Work performed by a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageTask {
    /// Build and emit the inventory in-process
    GenerateInventory,
    /// Run a playbook (relative to the playbook directory)
    Playbook(PathBuf),
}

impl StageTask {
    /// Name of the runner executing this task
    pub fn runner_name(&self) -> &'static str {
        match self {
            Self::GenerateInventory => "inventory",
            Self::Playbook(_) => "ansible",
        }
    }
}

/// A pipeline stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    /// Sequence key
    pub id: StageId,
    /// Short name (unique)
    pub name: String,
    /// Human-readable purpose
    pub purpose: String,
    /// Work performed
    pub task: StageTask,
    /// All must hold before the stage starts
    pub preconditions: Vec<Precondition>,
    /// Whether the stage may be repeated
    pub idempotency: Idempotency,
    /// Needs the Proxmox token secret
    pub requires_credentials: bool,
    /// Not applicable when this role group is empty
    pub requires_group: Option<Role>,
}

impl StageDescriptor {
    pub fn new(id: u16, name: &str, purpose: &str, task: StageTask) -> Self {
        Self {
            id: StageId::new(id),
            name: name.to_string(),
            purpose: purpose.to_string(),
            task,
            preconditions: Vec::new(),
            idempotency: Idempotency::SafeToRerun,
            requires_credentials: false,
            requires_group: None,
        }
    }

    /// Add a precondition
    pub fn after(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    /// Mark the stage run-once
    pub fn run_once(mut self) -> Self {
        self.idempotency = Idempotency::RunOnce;
        self
    }

    /// Mark the stage as needing the Proxmox token
    pub fn with_credentials(mut self) -> Self {
        self.requires_credentials = true;
        self
    }

    /// Skip the stage when a role group is empty
    pub fn for_group(mut self, role: Role) -> Self {
        self.requires_group = Some(role);
        self
    }

    pub fn is_run_once(&self) -> bool {
        self.idempotency == Idempotency::RunOnce
    }
}

/// Which stages a run covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSelection {
    /// Explicitly invoked stages (empty means the whole sequence)
    pub stages: Vec<StageId>,
    /// First stage of a sequence run
    pub from: Option<StageId>,
    /// Last stage of a sequence run
    pub to: Option<StageId>,
}

impl StageSelection {
    /// Whether stages were named one by one
    pub fn is_explicit(&self) -> bool {
        !self.stages.is_empty()
    }
}

/// Ordered, validated set of stages
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDescriptor>,
}

impl StageRegistry {
    /// Validate and wrap a stage list
    pub fn new(stages: Vec<StageDescriptor>) -> ProxResult<Self> {
        if stages.is_empty() {
            return Err(invalid("no stages defined"));
        }

        let mut names = HashSet::new();
        for pair in stages.windows(2) {
            if pair[0].id >= pair[1].id {
                return Err(invalid(&format!(
                    "stage ids must increase: {} is followed by {}",
                    pair[0].id, pair[1].id
                )));
            }
        }

        for (idx, stage) in stages.iter().enumerate() {
            if !names.insert(stage.name.as_str()) {
                return Err(invalid(&format!("duplicate stage name '{}'", stage.name)));
            }

            for pre in &stage.preconditions {
                if let Precondition::StageCompleted(dep) = pre {
                    if !stages[..idx].iter().any(|s| s.id == *dep) {
                        return Err(invalid(&format!(
                            "stage {} waits on {}, which is not an earlier stage",
                            stage.id, dep
                        )));
                    }
                }
            }

            if stage.preconditions.contains(&Precondition::InventoryArtifact)
                && !stages[..idx].iter().any(|s| s.task == StageTask::GenerateInventory)
            {
                return Err(invalid(&format!(
                    "stage {} needs the inventory artifact but no earlier stage generates it",
                    stage.id
                )));
            }
        }

        StageGraph::build(&stages)?;

        Ok(Self { stages })
    }

    /// The k3s-on-Proxmox deployment sequence
    pub fn standard() -> Self {
        let stages = vec![
            StageDescriptor::new(
                100,
                "generate-inventory",
                "Build the host/group inventory from the cluster configuration",
                StageTask::GenerateInventory,
            ),
            StageDescriptor::new(
                200,
                "preconfigure-vms",
                "Clone, size and start the VMs on Proxmox",
                StageTask::Playbook("0200-preconfigure-vms.yaml".into()),
            )
            .after(Precondition::InventoryArtifact)
            .with_credentials(),
            StageDescriptor::new(
                300,
                "install-k3s",
                "Bootstrap the first server and join the remaining nodes",
                StageTask::Playbook("0300-install-k3s.yaml".into()),
            )
            .after(Precondition::StageCompleted(StageId::new(200)))
            .run_once(),
            StageDescriptor::new(
                310,
                "local-environment",
                "Fetch the kubeconfig and prepare the operator workstation",
                StageTask::Playbook("0310-local-environment.yaml".into()),
            )
            .after(Precondition::StageCompleted(StageId::new(300))),
            StageDescriptor::new(
                400,
                "load-balancer",
                "Install the service load balancer with the configured address pool",
                StageTask::Playbook("0400-load-balancer.yaml".into()),
            )
            .after(Precondition::StageCompleted(StageId::new(300))),
            StageDescriptor::new(
                410,
                "storage",
                "Install the distributed storage layer on storage nodes",
                StageTask::Playbook("0410-storage.yaml".into()),
            )
            .after(Precondition::StageCompleted(StageId::new(300)))
            .for_group(Role::Storage)
            .run_once(),
        ];

        Self { stages }
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn get(&self, id: StageId) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Parse user input into a known stage id
    pub fn resolve(&self, input: &str) -> ProxResult<StageId> {
        let not_found = || ProxError::StageNotFound {
            stage: input.to_string(),
        };

        if let Ok(id) = input.parse::<StageId>() {
            return self.get(id).map(|s| s.id).ok_or_else(not_found);
        }
        self.stages
            .iter()
            .find(|s| s.name == input)
            .map(|s| s.id)
            .ok_or_else(not_found)
    }

    /// Stage producing the inventory artifact
    pub fn inventory_stage(&self) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.task == StageTask::GenerateInventory)
    }

    /// Stages covered by a selection, in sequence order
    pub fn select(&self, selection: &StageSelection) -> ProxResult<Vec<&StageDescriptor>> {
        for id in selection.stages.iter().chain(selection.from.iter()).chain(selection.to.iter()) {
            if self.get(*id).is_none() {
                return Err(ProxError::StageNotFound {
                    stage: id.to_string(),
                });
            }
        }

        if selection.is_explicit() {
            return Ok(self
                .stages
                .iter()
                .filter(|s| selection.stages.contains(&s.id))
                .collect());
        }

        Ok(self
            .stages
            .iter()
            .filter(|s| selection.from.map_or(true, |from| s.id >= from))
            .filter(|s| selection.to.map_or(true, |to| s.id <= to))
            .collect())
    }
}

fn invalid(reason: &str) -> ProxError {
    ProxError::InvalidRegistry {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id_format_and_parse() {
        assert_eq!(StageId::new(100).to_string(), "0100");
        assert_eq!("0310".parse::<StageId>().unwrap(), StageId::new(310));
        assert_eq!("200".parse::<StageId>().unwrap(), StageId::new(200));
        assert!("02a0".parse::<StageId>().is_err());
        assert!("12345".parse::<StageId>().is_err());
        assert!("".parse::<StageId>().is_err());
    }

    #[test]
    fn test_standard_registry_is_valid() {
        let standard = StageRegistry::standard();
        let registry = StageRegistry::new(standard.stages().to_vec()).unwrap();

        let ids: Vec<String> = registry.stages().iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["0100", "0200", "0300", "0310", "0400", "0410"]);
        assert!(registry.get(StageId::new(300)).unwrap().is_run_once());
        assert!(!registry.get(StageId::new(100)).unwrap().is_run_once());
        assert_eq!(registry.inventory_stage().unwrap().id, StageId::new(100));
    }

    #[test]
    fn test_out_of_order_ids_are_rejected() {
        let stages = vec![
            StageDescriptor::new(200, "b", "", StageTask::GenerateInventory),
            StageDescriptor::new(100, "a", "", StageTask::Playbook("a.yaml".into())),
        ];
        assert!(matches!(
            StageRegistry::new(stages),
            Err(ProxError::InvalidRegistry { .. })
        ));
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let stages = vec![
            StageDescriptor::new(100, "a", "", StageTask::GenerateInventory)
                .after(Precondition::StageCompleted(StageId::new(200))),
            StageDescriptor::new(200, "b", "", StageTask::Playbook("b.yaml".into())),
        ];
        assert!(StageRegistry::new(stages).is_err());
    }

    #[test]
    fn test_inventory_precondition_needs_a_producer() {
        let stages = vec![StageDescriptor::new(200, "b", "", StageTask::Playbook("b.yaml".into()))
            .after(Precondition::InventoryArtifact)];
        assert!(StageRegistry::new(stages).is_err());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let stages = vec![
            StageDescriptor::new(100, "a", "", StageTask::GenerateInventory),
            StageDescriptor::new(200, "a", "", StageTask::Playbook("a.yaml".into())),
        ];
        assert!(StageRegistry::new(stages).is_err());
    }

    #[test]
    fn test_resolve_by_id_or_name() {
        let registry = StageRegistry::standard();
        assert_eq!(registry.resolve("0300").unwrap(), StageId::new(300));
        assert_eq!(registry.resolve("install-k3s").unwrap(), StageId::new(300));
        assert!(matches!(
            registry.resolve("0999"),
            Err(ProxError::StageNotFound { .. })
        ));
    }

    #[test]
    fn test_select_ranges() {
        let registry = StageRegistry::standard();
        let ids = |sel: &StageSelection| -> Vec<u16> {
            registry
                .select(sel)
                .unwrap()
                .iter()
                .map(|s| s.id.value())
                .collect()
        };

        assert_eq!(ids(&StageSelection::default()).len(), 6);
        assert_eq!(
            ids(&StageSelection {
                from: Some(StageId::new(300)),
                to: Some(StageId::new(400)),
                ..Default::default()
            }),
            vec![300, 310, 400]
        );
        // Explicit stages come back in sequence order whatever the input order
        assert_eq!(
            ids(&StageSelection {
                stages: vec![StageId::new(310), StageId::new(200)],
                ..Default::default()
            }),
            vec![200, 310]
        );
        assert!(registry
            .select(&StageSelection {
                stages: vec![StageId::new(999)],
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn test_stage_id_serde() {
        let json = serde_json::to_string(&StageId::new(310)).unwrap();
        assert_eq!(json, "\"0310\"");
        let back: StageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StageId::new(310));
    }
}
