// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Inventory model builder
//!
//! Every node lands in the implicit `all` group and in one group per role
//! tag. Membership keeps the document's node order, groups follow the role
//! order, so identical input always yields an identical graph.

use serde_yaml::Value;
use std::collections::HashMap;

use crate::config::{Address, ClusterConfig, NodeSpec, Role, VarMap};
use crate::errors::{ProxError, ProxResult};

/// Name of the implicit group holding every host
pub const ALL_GROUP: &str = "all";

/// A managed host and its variables
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub name: String,
    pub vars: VarMap,
}

/// A named set of hosts with shared variables
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub members: Vec<String>,
    pub vars: VarMap,
}

impl Group {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Vec::new(),
            vars: VarMap::new(),
        }
    }
}

/// Normalized host/group graph
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    /// Hosts in document order
    pub hosts: Vec<Host>,
    /// `all` first, then one group per role present
    pub groups: Vec<Group>,
}

impl Inventory {
    /// Get a group by name
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Get a host by name
    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// The implicit group holding every host
    pub fn all(&self) -> &Group {
        &self.groups[0]
    }

    /// Groups other than `all`
    pub fn children(&self) -> &[Group] {
        &self.groups[1..]
    }

    /// Names of the groups a host belongs to
    pub fn groups_of(&self, host: &str) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|g| g.members.iter().any(|m| m == host))
            .map(|g| g.name.as_str())
            .collect()
    }

    /// Number of hosts in a role group (zero when the group is absent)
    pub fn role_size(&self, role: Role) -> usize {
        self.group(role.group_name()).map_or(0, |g| g.members.len())
    }
}

/// Inventory model builder
pub struct InventoryBuilder;

impl InventoryBuilder {
    /// Build the host/group graph from a validated configuration
    pub fn build(config: &ClusterConfig) -> ProxResult<Inventory> {
        Self::check_unique_ids(config)?;

        let mut all = Group::new(ALL_GROUP);
        all.vars = Self::cluster_vars(config);
        if let Some(extra) = config.group_vars.get(ALL_GROUP) {
            all.vars.extend(extra.clone());
        }

        let mut role_groups: Vec<Group> = Role::ALL
            .iter()
            .map(|role| {
                let mut group = Group::new(role.group_name());
                if let Some(extra) = config.group_vars.get(role.group_name()) {
                    group.vars = extra.clone();
                }
                group
            })
            .collect();

        let mut hosts = Vec::with_capacity(config.nodes.len());

        for node in &config.nodes {
            all.members.push(node.id.clone());

            for (role, group) in Role::ALL.iter().zip(role_groups.iter_mut()) {
                if node.roles.contains(role) {
                    group.members.push(node.id.clone());
                }
            }

            hosts.push(Host {
                name: node.id.clone(),
                vars: Self::host_vars(node),
            });
        }

        let mut groups = vec![all];
        groups.extend(role_groups.into_iter().filter(|g| !g.members.is_empty()));

        Ok(Inventory { hosts, groups })
    }

    fn check_unique_ids(config: &ClusterConfig) -> ProxResult<()> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (idx, node) in config.nodes.iter().enumerate() {
            if let Some(first) = seen.insert(node.id.as_str(), idx) {
                return Err(ProxError::DuplicateNodeId {
                    id: node.id.clone(),
                    first,
                    second: idx,
                });
            }
        }
        Ok(())
    }

    /// Variables of the `all` group, derived from cluster-wide settings
    fn cluster_vars(config: &ClusterConfig) -> VarMap {
        let cluster = &config.cluster;
        let network = &cluster.network;
        let pve = &config.proxmox;

        let mut vars = VarMap::new();
        vars.insert("cluster_name".into(), string(&cluster.name));
        if let Some(version) = &cluster.k3s_version {
            vars.insert("k3s_version".into(), string(version));
        }
        vars.insert("cluster_cidr".into(), string(&network.cidr));
        vars.insert("cluster_gateway".into(), string(&network.gateway));
        vars.insert(
            "cluster_dns".into(),
            Value::Sequence(network.dns.iter().map(|d| string(d)).collect()),
        );
        if let Some(vip) = &network.vip {
            vars.insert("cluster_vip".into(), string(vip));
        }
        if let Some(range) = &network.load_balancer_range {
            vars.insert("load_balancer_range".into(), string(range));
        }

        vars.insert("ansible_user".into(), string(&cluster.ssh.user));
        if let Some(key) = &cluster.ssh.public_key_file {
            vars.insert(
                "ssh_public_key_file".into(),
                string(&key.to_string_lossy()),
            );
        }

        vars.insert("proxmox_api_host".into(), string(&pve.api_host));
        vars.insert("proxmox_api_user".into(), string(&pve.api_user));
        vars.insert("proxmox_api_token_id".into(), string(&pve.api_token_id));
        vars.insert("proxmox_validate_certs".into(), Value::Bool(pve.validate_certs));
        if let Some(template) = pve.template_vmid {
            vars.insert("proxmox_template_vmid".into(), number(template));
        }
        vars.insert("proxmox_storage".into(), string(&pve.storage));
        vars.insert("proxmox_bridge".into(), string(&pve.bridge));

        vars
    }

    /// Per-host variables; the node's own `vars` win over derived ones
    fn host_vars(node: &NodeSpec) -> VarMap {
        let mut vars = VarMap::new();

        match node.network.address {
            Address::Static(ip) => {
                vars.insert("ansible_host".into(), string(&ip.to_string()));
                vars.insert("ip_address".into(), string(&ip.to_string()));
                vars.insert("network_mode".into(), string("static"));
            }
            Address::Dhcp => {
                vars.insert("ip_address".into(), string("dhcp"));
                vars.insert("network_mode".into(), string("dhcp"));
            }
        }

        vars.insert("vmid".into(), number(node.vmid));
        vars.insert("proxmox_node".into(), string(&node.proxmox_node));
        vars.insert("vm_cores".into(), number(node.resources.cores));
        vars.insert("vm_memory_mb".into(), number(node.resources.memory_mb));
        vars.insert("vm_disk_gb".into(), number(node.resources.disk_gb));
        vars.insert(
            "node_roles".into(),
            Value::Sequence(node.roles.iter().map(|r| string(r.group_name())).collect()),
        );

        vars.extend(node.vars.clone());
        vars
    }
}

fn string(s: &str) -> Value {
    Value::String(s.to_string())
}

fn number(n: u32) -> Value {
    Value::Number(u64::from(n).into())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{NetworkPlacement, ResourceProfile};

    pub(crate) fn node(id: &str, vmid: u32, roles: &[Role]) -> NodeSpec {
        NodeSpec {
            id: id.into(),
            vmid,
            proxmox_node: "pve1".into(),
            roles: roles.to_vec(),
            resources: ResourceProfile {
                cores: 2,
                memory_mb: 2048,
                disk_gb: 20,
            },
            network: NetworkPlacement::default(),
            vars: VarMap::new(),
        }
    }

    pub(crate) fn config_with(nodes: Vec<NodeSpec>) -> ClusterConfig {
        let mut config = ClusterConfig::from_yaml(
            r#"
cluster:
  name: lab
  k3s_version: v1.30.4+k3s1
  network:
    cidr: 10.0.0.0/24
    gateway: 10.0.0.1
    dns: [1.1.1.1]
proxmox:
  api_host: pve.lan
  api_user: ansible@pve
  api_token_id: ansible@pve!ansible
  api_token_secret_ref: proxmox/ansible
nodes: []
"#,
        )
        .unwrap();
        config.nodes = nodes;
        config
    }

    /// Three nodes tagged {control-plane}, {worker}, {worker, storage}
    pub(crate) fn three_node_config() -> ClusterConfig {
        config_with(vec![
            node("cp-1", 101, &[Role::ControlPlane]),
            node("wk-1", 102, &[Role::Worker]),
            node("wk-2", 103, &[Role::Worker, Role::Storage]),
        ])
    }

    #[test]
    fn test_group_sizes_for_three_nodes() {
        let inventory = InventoryBuilder::build(&three_node_config()).unwrap();

        let sizes: Vec<(&str, usize)> = inventory
            .groups
            .iter()
            .map(|g| (g.name.as_str(), g.members.len()))
            .collect();
        assert_eq!(
            sizes,
            vec![("all", 3), ("control-plane", 1), ("worker", 2), ("storage", 1)]
        );
    }

    #[test]
    fn test_membership_follows_document_order() {
        let config = config_with(vec![
            node("wk-9", 109, &[Role::Worker]),
            node("cp-1", 101, &[Role::ControlPlane]),
            node("wk-1", 102, &[Role::Storage, Role::Worker]),
        ]);
        let inventory = InventoryBuilder::build(&config).unwrap();

        assert_eq!(inventory.all().members, vec!["wk-9", "cp-1", "wk-1"]);
        assert_eq!(
            inventory.group("worker").unwrap().members,
            vec!["wk-9", "wk-1"]
        );
        // Tag order on the node does not influence group order
        assert_eq!(inventory.groups_of("wk-1"), vec!["all", "worker", "storage"]);
    }

    #[test]
    fn test_empty_role_groups_are_omitted() {
        let config = config_with(vec![node("cp-1", 101, &[Role::ControlPlane])]);
        let inventory = InventoryBuilder::build(&config).unwrap();

        assert!(inventory.group("storage").is_none());
        assert_eq!(inventory.role_size(Role::Storage), 0);
        assert_eq!(inventory.children().len(), 1);
    }

    #[test]
    fn test_duplicate_identifier_is_rejected() {
        let config = config_with(vec![
            node("cp-1", 101, &[Role::ControlPlane]),
            node("wk-1", 102, &[Role::Worker]),
            node("cp-1", 103, &[Role::Worker]),
        ]);

        match InventoryBuilder::build(&config) {
            Err(ProxError::DuplicateNodeId { id, first, second }) => {
                assert_eq!(id, "cp-1");
                assert_eq!((first, second), (0, 2));
            }
            other => panic!("expected DuplicateNodeId, got {other:?}"),
        }
    }

    #[test]
    fn test_host_vars_carry_network_and_resources() {
        let mut cp = node("cp-1", 101, &[Role::ControlPlane]);
        cp.network.address = "10.0.0.11".parse().unwrap();
        cp.vars.insert("k3s_extra_args".into(), string("--disable traefik"));
        let config = config_with(vec![cp, node("wk-1", 102, &[Role::Worker])]);

        let inventory = InventoryBuilder::build(&config).unwrap();

        let cp = inventory.host("cp-1").unwrap();
        assert_eq!(cp.vars["ansible_host"], string("10.0.0.11"));
        assert_eq!(cp.vars["network_mode"], string("static"));
        assert_eq!(cp.vars["vmid"], number(101));
        assert_eq!(cp.vars["k3s_extra_args"], string("--disable traefik"));

        let wk = inventory.host("wk-1").unwrap();
        assert!(!wk.vars.contains_key("ansible_host"));
        assert_eq!(wk.vars["ip_address"], string("dhcp"));
    }

    #[test]
    fn test_group_vars_are_merged() {
        let mut config = three_node_config();
        let mut all_extra = VarMap::new();
        all_extra.insert("ansible_user".into(), string("debian"));
        config.group_vars.insert("all".into(), all_extra);
        let mut worker_extra = VarMap::new();
        worker_extra.insert("k3s_node_labels".into(), string("tier=apps"));
        config.group_vars.insert("worker".into(), worker_extra);

        let inventory = InventoryBuilder::build(&config).unwrap();

        assert_eq!(inventory.all().vars["ansible_user"], string("debian"));
        assert_eq!(inventory.all().vars["cluster_name"], string("lab"));
        assert_eq!(
            inventory.group("worker").unwrap().vars["k3s_node_labels"],
            string("tier=apps")
        );
        assert!(inventory.group("storage").unwrap().vars.is_empty());
    }

    #[test]
    fn test_secret_is_never_a_variable() {
        let inventory = InventoryBuilder::build(&three_node_config()).unwrap();
        let rendered = format!("{:?}", inventory);
        assert!(!rendered.contains("proxmox/ansible"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let config = three_node_config();
        assert_eq!(
            InventoryBuilder::build(&config).unwrap(),
            InventoryBuilder::build(&config).unwrap()
        );
    }
}
