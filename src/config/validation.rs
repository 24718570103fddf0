// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Configuration validation
//!
//! Semantic checks that serde cannot express: address arithmetic,
//! uniqueness of VM ids, resource minimums and required roles.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use super::{AddressRange, ClusterConfig, Ipv4Cidr, NodeSpec, Role};
use crate::errors::ProxError;

const MIN_MEMORY_MB: u32 = 512;

/// One violated rule, naming the field and the shape it should have
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    pub field: String,
    pub expected: String,
}

impl SchemaIssue {
    fn new(field: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
        }
    }

    pub fn into_error(self) -> ProxError {
        ProxError::schema(self.field, self.expected)
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {}", self.field, self.expected)
    }
}

/// Validation report
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<SchemaIssue>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    fn issue(&mut self, field: impl Into<String>, expected: impl Into<String>) {
        self.issues.push(SchemaIssue::new(field, expected));
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a parsed configuration document
    pub fn validate(config: &ClusterConfig) -> ValidationReport {
        let mut report = ValidationReport::default();

        let cidr = Self::validate_network(config, &mut report);
        Self::validate_proxmox(config, &mut report);

        if config.nodes.is_empty() {
            report.issue("nodes", "at least one node specification");
        }

        let mut vmids: HashMap<u32, usize> = HashMap::new();
        let mut addresses: HashMap<Ipv4Addr, usize> = HashMap::new();

        for (idx, node) in config.nodes.iter().enumerate() {
            Self::validate_node(idx, node, cidr.as_ref(), &mut report);

            if let Some(first) = vmids.insert(node.vmid, idx) {
                report.issue(
                    format!("nodes[{}].vmid", idx),
                    format!("a VM id not already used by nodes[{}] ({})", first, node.vmid),
                );
            }

            if let Some(ip) = node.network.address.as_static() {
                if let Some(first) = addresses.insert(ip, idx) {
                    report.issue(
                        format!("nodes[{}].network.address", idx),
                        format!("an address not already used by nodes[{}] ({})", first, ip),
                    );
                }
            }
        }

        Self::validate_address_pools(config, cidr.as_ref(), &mut report);

        let control_planes: Vec<&NodeSpec> = config.nodes_with_role(Role::ControlPlane).collect();
        if !config.nodes.is_empty() && control_planes.is_empty() {
            report.issue("nodes[*].roles", "at least one node tagged 'control-plane'");
        }
        if control_planes.len() > 1 && control_planes.len() % 2 == 0 {
            report.warn(format!(
                "{} control-plane nodes: an odd number keeps etcd quorum after a failure",
                control_planes.len()
            ));
        }
        for node in &control_planes {
            if node.network.address.as_static().is_none() {
                report.warn(format!(
                    "control-plane node '{}' uses DHCP; its API address may change",
                    node.id
                ));
            }
        }

        for key in config.group_vars.keys() {
            if key == "all" {
                continue;
            }
            match key.parse::<Role>() {
                Ok(role) if config.nodes_with_role(role).next().is_none() => {
                    report.warn(format!(
                        "group_vars.{} is unused: no node carries the '{}' role",
                        key, role
                    ));
                }
                Ok(_) => {}
                Err(_) => report.issue(
                    format!("group_vars.{}", key),
                    "a group named 'all', 'control-plane', 'worker' or 'storage'",
                ),
            }
        }

        if !config.proxmox.validate_certs {
            report.warn("proxmox.validate_certs is false; the API certificate is not verified");
        }

        report
    }

    fn validate_network(config: &ClusterConfig, report: &mut ValidationReport) -> Option<Ipv4Cidr> {
        let network = &config.cluster.network;

        if config.cluster.name.trim().is_empty() {
            report.issue("cluster.name", "a non-empty cluster name");
        }

        let cidr = match network.cidr.parse::<Ipv4Cidr>() {
            Ok(cidr) => Some(cidr),
            Err(e) => {
                report.issue("cluster.network.cidr", format!("an IPv4 CIDR like 192.168.10.0/24 ({})", e));
                None
            }
        };

        match network.gateway.parse::<Ipv4Addr>() {
            Ok(gw) => {
                if let Some(cidr) = cidr {
                    if !cidr.contains(gw) {
                        report.issue("cluster.network.gateway", format!("an address inside {}", cidr));
                    }
                }
            }
            Err(_) => report.issue("cluster.network.gateway", "an IPv4 address"),
        }

        for (idx, dns) in network.dns.iter().enumerate() {
            if dns.parse::<Ipv4Addr>().is_err() {
                report.issue(format!("cluster.network.dns[{}]", idx), "an IPv4 address");
            }
        }

        if let Some(vip) = &network.vip {
            match vip.parse::<Ipv4Addr>() {
                Ok(ip) => {
                    if let Some(cidr) = cidr {
                        if !cidr.contains(ip) {
                            report.issue("cluster.network.vip", format!("an address inside {}", cidr));
                        }
                    }
                }
                Err(_) => report.issue("cluster.network.vip", "an IPv4 address"),
            }
        }

        if let Some(range) = &network.load_balancer_range {
            if let Err(e) = range.parse::<AddressRange>() {
                report.issue(
                    "cluster.network.load_balancer_range",
                    format!("a range like 192.168.10.200-192.168.10.220 ({})", e),
                );
            }
        }

        cidr
    }

    /// The VIP and the load-balancer pool must not collide with each other,
    /// with node addresses, or leave the subnet
    fn validate_address_pools(config: &ClusterConfig, cidr: Option<&Ipv4Cidr>, report: &mut ValidationReport) {
        let network = &config.cluster.network;
        // Syntax errors were reported by validate_network
        let vip = network.vip.as_deref().and_then(|v| v.parse::<Ipv4Addr>().ok());
        let range = network
            .load_balancer_range
            .as_deref()
            .and_then(|r| r.parse::<AddressRange>().ok());

        let nodes: Vec<(usize, &NodeSpec, Ipv4Addr)> = config
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| node.network.address.as_static().map(|ip| (idx, node, ip)))
            .collect();

        if let Some(vip) = vip {
            for (idx, node, ip) in &nodes {
                if *ip == vip {
                    report.issue(
                        "cluster.network.vip",
                        format!("an address not used by nodes[{}] ('{}', {})", idx, node.id, ip),
                    );
                }
            }
        }

        let Some(range) = range else {
            return;
        };

        if let Some(cidr) = cidr {
            if !cidr.contains(range.first) || !cidr.contains(range.last) {
                report.issue(
                    "cluster.network.load_balancer_range",
                    format!("a range inside {}", cidr),
                );
            }
        }

        if let Some(vip) = vip.filter(|ip| range.contains(*ip)) {
            report.issue(
                "cluster.network.load_balancer_range",
                format!("a range that does not cover the vip ({})", vip),
            );
        }

        for (idx, node, ip) in &nodes {
            if range.contains(*ip) {
                report.issue(
                    "cluster.network.load_balancer_range",
                    format!("a range that does not cover nodes[{}] ('{}', {})", idx, node.id, ip),
                );
            }
        }
    }

    fn validate_proxmox(config: &ClusterConfig, report: &mut ValidationReport) {
        let pve = &config.proxmox;
        let required = [
            ("proxmox.api_host", &pve.api_host),
            ("proxmox.api_user", &pve.api_user),
            ("proxmox.api_token_id", &pve.api_token_id),
            ("proxmox.api_token_secret_ref", &pve.api_token_secret_ref),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                report.issue(field, "a non-empty string");
            }
        }

        if !pve.api_user.is_empty() && !pve.api_user.contains('@') {
            report.issue("proxmox.api_user", "a user with realm, like ansible@pve");
        }

        if !pve.api_token_id.is_empty() && !pve.api_token_id.contains('!') {
            report.issue("proxmox.api_token_id", "a full token id, like ansible@pve!ansible");
        }
    }

    fn validate_node(idx: usize, node: &NodeSpec, cidr: Option<&Ipv4Cidr>, report: &mut ValidationReport) {
        let field = |name: &str| format!("nodes[{}].{}", idx, name);

        if node.id.trim().is_empty() {
            report.issue(field("id"), "a non-empty node identifier");
        }

        if node.proxmox_node.trim().is_empty() {
            report.issue(field("proxmox_node"), "the Proxmox node name hosting the VM");
        }

        if node.vmid < 100 {
            report.issue(field("vmid"), "a Proxmox VM id of at least 100");
        }

        if node.roles.is_empty() {
            report.issue(field("roles"), "at least one of control-plane, worker, storage");
        }
        let mut seen = Vec::new();
        for role in &node.roles {
            if seen.contains(role) {
                report.issue(field("roles"), format!("each role at most once ('{}' repeats)", role));
            }
            seen.push(*role);
        }

        let res = &node.resources;
        if res.cores == 0 {
            report.issue(field("resources.cores"), "at least 1 core");
        }
        if res.memory_mb < MIN_MEMORY_MB {
            report.issue(field("resources.memory_mb"), format!("at least {} MiB", MIN_MEMORY_MB));
        }
        if res.disk_gb == 0 {
            report.issue(field("resources.disk_gb"), "at least 1 GiB");
        }

        if let (Some(ip), Some(cidr)) = (node.network.address.as_static(), cidr) {
            if !cidr.contains(ip) || cidr.is_reserved(ip) {
                report.issue(
                    field("network.address"),
                    format!("a usable host address inside {} or 'dhcp'", cidr),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ClusterConfig {
        ClusterConfig::from_yaml(
            r#"
cluster:
  name: lab
  network:
    cidr: 10.0.0.0/24
    gateway: 10.0.0.1
    dns: [10.0.0.1]
proxmox:
  api_host: pve.lan
  api_user: ansible@pve
  api_token_id: ansible@pve!ansible
  api_token_secret_ref: proxmox/ansible
  validate_certs: true
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
    roles: [worker]
    resources: { cores: 2, memory_mb: 4096, disk_gb: 32 }
    network: { address: 10.0.0.12 }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config_has_no_issues() {
        let report = ConfigValidator::validate(&base_config());
        assert!(report.is_valid(), "{:?}", report.issues);
        assert!(!report.has_warnings(), "{:?}", report.warnings);
    }

    #[test]
    fn test_address_outside_cidr() {
        let mut config = base_config();
        config.nodes[1].network.address = "10.0.1.12".parse().unwrap();

        let report = ConfigValidator::validate(&config);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].field, "nodes[1].network.address");
    }

    #[test]
    fn test_duplicate_vmid_and_address() {
        let mut config = base_config();
        config.nodes[1].vmid = 101;
        config.nodes[1].network.address = config.nodes[0].network.address;

        let report = ConfigValidator::validate(&config);
        let fields: Vec<_> = report.issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"nodes[1].vmid"));
        assert!(fields.contains(&"nodes[1].network.address"));
    }

    #[test]
    fn test_missing_control_plane() {
        let mut config = base_config();
        config.nodes[0].roles = vec![Role::Worker];

        let report = ConfigValidator::validate(&config);
        assert!(report.issues.iter().any(|i| i.expected.contains("control-plane")));
    }

    #[test]
    fn test_resource_minimums() {
        let mut config = base_config();
        config.nodes[0].resources.cores = 0;
        config.nodes[0].resources.memory_mb = 128;

        let report = ConfigValidator::validate(&config);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].field, "nodes[0].resources.cores");
    }

    #[test]
    fn test_unknown_group_vars_key() {
        let mut config = base_config();
        config.group_vars.insert("masters".into(), Default::default());

        let report = ConfigValidator::validate(&config);
        assert_eq!(report.issues[0].field, "group_vars.masters");
    }

    fn issue_fields(config: &ClusterConfig) -> Vec<String> {
        ConfigValidator::validate(config)
            .issues
            .into_iter()
            .map(|i| i.field)
            .collect()
    }

    #[test]
    fn test_vip_equal_to_node_address() {
        let mut config = base_config();
        config.cluster.network.vip = Some("10.0.0.11".into());

        let report = ConfigValidator::validate(&config);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].field, "cluster.network.vip");
        assert!(report.issues[0].expected.contains("cp-1"));
    }

    #[test]
    fn test_load_balancer_range_outside_cidr() {
        let mut config = base_config();
        config.cluster.network.load_balancer_range = Some("172.16.0.10-172.16.0.20".into());
        assert_eq!(issue_fields(&config), vec!["cluster.network.load_balancer_range"]);

        // Starts inside, ends outside
        config.cluster.network.load_balancer_range = Some("10.0.0.250-10.0.1.5".into());
        assert_eq!(issue_fields(&config), vec!["cluster.network.load_balancer_range"]);
    }

    #[test]
    fn test_load_balancer_range_covering_vip() {
        let mut config = base_config();
        config.cluster.network.vip = Some("10.0.0.50".into());
        config.cluster.network.load_balancer_range = Some("10.0.0.40-10.0.0.60".into());

        let report = ConfigValidator::validate(&config);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].expected.contains("vip"));
    }

    #[test]
    fn test_load_balancer_range_covering_node() {
        let mut config = base_config();
        config.cluster.network.vip = Some("10.0.0.11".into());
        config.cluster.network.load_balancer_range = Some("10.0.0.10-10.0.0.20".into());

        let fields = issue_fields(&config);
        assert!(fields.contains(&"cluster.network.vip".to_string()));
        // vip, cp-1 and wk-1 all fall inside the pool
        assert_eq!(
            fields
                .iter()
                .filter(|f| *f == "cluster.network.load_balancer_range")
                .count(),
            3
        );
    }

    #[test]
    fn test_disjoint_pools_are_valid() {
        let mut config = base_config();
        config.cluster.network.vip = Some("10.0.0.50".into());
        config.cluster.network.load_balancer_range = Some("10.0.0.200-10.0.0.220".into());

        assert!(ConfigValidator::validate(&config).is_valid());
    }

    #[test]
    fn test_group_vars_for_absent_role_warns() {
        let mut config = base_config();
        config.group_vars.insert("storage".into(), Default::default());
        config.group_vars.insert("worker".into(), Default::default());

        let report = ConfigValidator::validate(&config);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("group_vars.storage is unused"));
    }

    #[test]
    fn test_even_control_plane_count_warns() {
        let mut config = base_config();
        config.nodes[1].roles = vec![Role::ControlPlane];

        let report = ConfigValidator::validate(&config);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("odd number")));
    }

    #[test]
    fn test_bad_token_id() {
        let mut config = base_config();
        config.proxmox.api_token_id = "ansible".into();

        let report = ConfigValidator::validate(&config);
        assert_eq!(report.issues[0].field, "proxmox.api_token_id");
        assert_eq!(
            report.issues[0].clone().into_error().to_string(),
            "Invalid configuration at 'proxmox.api_token_id': expected a full token id, like ansible@pve!ansible"
        );
    }
}
