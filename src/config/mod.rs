// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Cluster configuration document
//!
//! Defines the schema for `config/cluster.yaml`, the single source of truth
//! every inventory and stage is derived from.

mod loader;
mod network;
mod validation;

pub use loader::{ConfigLoader, LoadedConfig, PLACEHOLDER};
pub use network::{AddressRange, Ipv4Cidr};
pub use validation::{ConfigValidator, SchemaIssue, ValidationReport};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

/// Free-form variables attached to a node or a group
pub type VarMap = BTreeMap<String, serde_yaml::Value>;

/// Root of the configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Document version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Cluster-wide settings
    pub cluster: ClusterSettings,

    /// Proxmox connection parameters
    pub proxmox: ProxmoxConnection,

    /// Credential helper settings
    #[serde(default)]
    pub credentials: CredentialSettings,

    /// Target VMs in the order they should appear in the inventory
    pub nodes: Vec<NodeSpec>,

    /// Extra variables per group, keyed by `all` or a role tag
    #[serde(default)]
    pub group_vars: BTreeMap<String, VarMap>,
}

fn default_version() -> String {
    "1".to_string()
}

impl ClusterConfig {
    /// Parse a configuration document without validating it
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::ProxError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize the document back to YAML
    pub fn to_yaml(&self) -> Result<String, crate::ProxError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a node by identifier
    pub fn get_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes carrying a role tag, in document order
    pub fn nodes_with_role(&self, role: Role) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(move |n| n.roles.contains(&role))
    }
}

/// Cluster-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSettings {
    /// Cluster name
    pub name: String,

    /// k3s release to install (installer default when absent)
    #[serde(default)]
    pub k3s_version: Option<String>,

    /// Network parameters shared by all nodes
    pub network: NetworkSettings,

    /// SSH access to the VMs
    #[serde(default)]
    pub ssh: SshSettings,
}

/// Cluster network parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSettings {
    /// Node subnet, e.g. `192.168.10.0/24`
    pub cidr: String,

    /// Default gateway for static addresses
    pub gateway: String,

    /// DNS resolvers
    #[serde(default)]
    pub dns: Vec<String>,

    /// Virtual IP for the control plane
    #[serde(default)]
    pub vip: Option<String>,

    /// Address pool handed to the load balancer, `first-last`
    #[serde(default)]
    pub load_balancer_range: Option<String>,
}

/// SSH access to the VMs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshSettings {
    /// Login user created by cloud-init
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Public key injected into the VMs
    #[serde(default)]
    pub public_key_file: Option<PathBuf>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            public_key_file: None,
        }
    }
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

/// Proxmox connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxmoxConnection {
    /// API host (FQDN or IP)
    pub api_host: String,

    /// Automation user, e.g. `ansible@pve`
    pub api_user: String,

    /// Full token id, e.g. `ansible@pve!ansible`
    pub api_token_id: String,

    /// Entry name in the credential helper holding the token secret
    pub api_token_secret_ref: String,

    /// Verify the API TLS certificate
    #[serde(default)]
    pub validate_certs: bool,

    /// VM template cloned for every node
    #[serde(default)]
    pub template_vmid: Option<u32>,

    /// Storage pool for VM disks
    #[serde(default = "default_storage")]
    pub storage: String,

    /// Network bridge for VM NICs
    #[serde(default = "default_bridge")]
    pub bridge: String,
}

fn default_storage() -> String {
    "local-lvm".to_string()
}

fn default_bridge() -> String {
    "vmbr0".to_string()
}

/// Credential helper settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialSettings {
    /// Password-caching helper binary
    #[serde(default = "default_helper")]
    pub helper: String,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            helper: default_helper(),
        }
    }
}

fn default_helper() -> String {
    "pass".to_string()
}

/// One target VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    /// Identifier, used as the inventory host name
    pub id: String,

    /// Proxmox VM id
    pub vmid: u32,

    /// Proxmox node the VM is placed on
    pub proxmox_node: String,

    /// Role tags, drive group membership
    pub roles: Vec<Role>,

    /// CPU, memory and disk
    pub resources: ResourceProfile,

    /// Address or DHCP
    #[serde(default)]
    pub network: NetworkPlacement,

    /// Extra host variables, carried through unchanged
    #[serde(default)]
    pub vars: VarMap,
}

/// Resource profile of a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceProfile {
    pub cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
}

/// Network placement of a VM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkPlacement {
    #[serde(default)]
    pub address: Address,
}

/// Static IPv4 address or the DHCP marker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    #[default]
    Dhcp,
    Static(Ipv4Addr),
}

impl Address {
    /// The static address, if any
    pub fn as_static(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Static(ip) => Some(*ip),
            Self::Dhcp => None,
        }
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("dhcp") {
            return Ok(Self::Dhcp);
        }
        s.parse::<Ipv4Addr>()
            .map(Self::Static)
            .map_err(|_| format!("expected an IPv4 address or 'dhcp', got '{}'", s))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dhcp => write!(f, "dhcp"),
            Self::Static(ip) => write!(f, "{}", ip),
        }
    }
}

/// Role tags; the closed set downstream stages branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    ControlPlane,
    Worker,
    Storage,
}

impl Role {
    /// Every role, in the order groups are emitted
    pub const ALL: [Role; 3] = [Role::ControlPlane, Role::Worker, Role::Storage];

    /// Inventory group name for this role
    pub fn group_name(&self) -> &'static str {
        match self {
            Self::ControlPlane => "control-plane",
            Self::Worker => "worker",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.group_name() == s)
            .ok_or_else(|| format!("Unknown role: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
cluster:
  name: lab
  network:
    cidr: 10.0.0.0/24
    gateway: 10.0.0.1
proxmox:
  api_host: pve.lan
  api_user: ansible@pve
  api_token_id: ansible@pve!ansible
  api_token_secret_ref: proxmox/ansible
nodes:
  - id: cp-1
    vmid: 101
    proxmox_node: pve1
    roles: [control-plane]
    resources: { cores: 2, memory_mb: 4096, disk_gb: 32 }
    network: { address: 10.0.0.11 }
  - id: wk-1
    vmid: 102
    proxmox_node: pve1
    roles: [worker, storage]
    resources: { cores: 4, memory_mb: 8192, disk_gb: 64 }
"#;

    #[test]
    fn test_parse_minimal_document() {
        let config = ClusterConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.version, "1");
        assert_eq!(config.cluster.ssh.user, "ubuntu");
        assert_eq!(config.proxmox.storage, "local-lvm");
        assert_eq!(config.credentials.helper, "pass");
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(
            config.nodes[0].network.address,
            Address::Static("10.0.0.11".parse().unwrap())
        );
        // Omitted address falls back to DHCP
        assert_eq!(config.nodes[1].network.address, Address::Dhcp);
        assert_eq!(config.nodes[1].roles, vec![Role::Worker, Role::Storage]);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let yaml = MINIMAL.replace("[control-plane]", "[master]");
        assert!(ClusterConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let yaml = MINIMAL.replace("vmid: 101", "vmid: 101\n    cpu: 2");
        assert!(ClusterConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_address_parsing() {
        assert_eq!("DHCP".parse::<Address>().unwrap(), Address::Dhcp);
        assert_eq!(
            "192.168.1.5".parse::<Address>().unwrap().as_static(),
            Some(Ipv4Addr::new(192, 168, 1, 5))
        );
        assert!("192.168.1".parse::<Address>().is_err());
    }

    #[test]
    fn test_role_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.group_name().parse::<Role>().unwrap(), role);
        }
        assert_eq!(
            config_nodes_with_role(Role::Storage),
            vec!["wk-1".to_string()]
        );
    }

    fn config_nodes_with_role(role: Role) -> Vec<String> {
        ClusterConfig::from_yaml(MINIMAL)
            .unwrap()
            .nodes_with_role(role)
            .map(|n| n.id.clone())
            .collect()
    }
}
