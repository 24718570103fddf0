// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Inventory emitter
//!
//! Serializes the host/group graph into Ansible's YAML inventory layout and
//! into the JSON shape dynamic inventory scripts print for `--list` and
//! `--host`. Names that are not legal tokens are rejected, never rewritten.

use regex::Regex;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

use super::{Inventory, ALL_GROUP};
use crate::config::VarMap;
use crate::errors::{ProxError, ProxResult};

/// First lines of every emitted YAML artifact
pub const HEADER: &str = "# Generated by proxk3s from the cluster configuration.\n\
# Do not edit: regenerate with 'proxk3s inventory'.\n";

/// Output format for the inventory artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InventoryFormat {
    /// Static YAML inventory file
    #[default]
    Yaml,
    /// Dynamic inventory `--list` JSON
    Json,
}

impl std::str::FromStr for InventoryFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown inventory format: {}", s)),
        }
    }
}

/// Kind of name checked before emitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Host,
    Group,
    Variable,
}

impl TokenKind {
    fn pattern(&self) -> &'static Regex {
        static HOST: OnceLock<Regex> = OnceLock::new();
        static GROUP: OnceLock<Regex> = OnceLock::new();
        static VARIABLE: OnceLock<Regex> = OnceLock::new();

        match self {
            Self::Host => HOST.get_or_init(|| {
                Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("valid host regex")
            }),
            Self::Group => GROUP
                .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid group regex")),
            Self::Variable => VARIABLE
                .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid variable regex")),
        }
    }

    fn rule(&self) -> &'static str {
        match self {
            Self::Host => "host names use letters, digits, '.', '_' and '-' and start and end with a letter or digit",
            Self::Group => "group names use letters, digits, '_' and '-' and start with a letter or '_'",
            Self::Variable => "variable names use letters, digits and '_' and do not start with a digit",
        }
    }

    /// Check a name, returning an `EmitError` when it is not a legal token
    pub fn check(&self, name: &str) -> ProxResult<()> {
        if self.pattern().is_match(name) {
            Ok(())
        } else {
            Err(ProxError::EmitError {
                kind: self.to_string(),
                name: name.to_string(),
                reason: self.rule().to_string(),
            })
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Group => write!(f, "group"),
            Self::Variable => write!(f, "variable"),
        }
    }
}

/// Inventory emitter
pub struct InventoryEmitter;

impl InventoryEmitter {
    /// Check every host, group and variable name
    pub fn check_tokens(inventory: &Inventory) -> ProxResult<()> {
        for group in &inventory.groups {
            TokenKind::Group.check(&group.name)?;
            Self::check_keys(&group.vars)?;
        }
        for host in &inventory.hosts {
            TokenKind::Host.check(&host.name)?;
            Self::check_keys(&host.vars)?;
        }
        Ok(())
    }

    fn check_keys(vars: &VarMap) -> ProxResult<()> {
        vars.keys().try_for_each(|k| TokenKind::Variable.check(k))
    }

    /// Render in the requested format
    pub fn render(inventory: &Inventory, format: InventoryFormat) -> ProxResult<String> {
        match format {
            InventoryFormat::Yaml => Self::to_yaml(inventory),
            InventoryFormat::Json => Self::to_json(inventory),
        }
    }

    /// Render the static YAML inventory
    pub fn to_yaml(inventory: &Inventory) -> ProxResult<String> {
        Self::check_tokens(inventory)?;

        let mut hosts = Mapping::new();
        for host in &inventory.hosts {
            hosts.insert(Value::String(host.name.clone()), vars_or_null(&host.vars));
        }

        let mut children = Mapping::new();
        for group in inventory.children() {
            let mut members = Mapping::new();
            for member in &group.members {
                members.insert(Value::String(member.clone()), Value::Null);
            }

            let mut body = Mapping::new();
            if !group.vars.is_empty() {
                body.insert("vars".into(), vars_mapping(&group.vars));
            }
            body.insert("hosts".into(), Value::Mapping(members));
            children.insert(Value::String(group.name.clone()), Value::Mapping(body));
        }

        let all = inventory.all();
        let mut all_body = Mapping::new();
        if !all.vars.is_empty() {
            all_body.insert("vars".into(), vars_mapping(&all.vars));
        }
        all_body.insert("hosts".into(), Value::Mapping(hosts));
        if !children.is_empty() {
            all_body.insert("children".into(), Value::Mapping(children));
        }

        let mut root = Mapping::new();
        root.insert(ALL_GROUP.into(), Value::Mapping(all_body));

        let body = serde_yaml::to_string(&Value::Mapping(root))?;
        Ok(format!("{}{}", HEADER, body))
    }

    /// Render the dynamic inventory `--list` JSON
    pub fn to_json(inventory: &Inventory) -> ProxResult<String> {
        Self::check_tokens(inventory)?;

        let mut hostvars = JsonMap::new();
        for host in &inventory.hosts {
            hostvars.insert(host.name.clone(), serde_json::to_value(&host.vars)?);
        }

        let mut root = JsonMap::new();
        root.insert("_meta".into(), json!({ "hostvars": hostvars }));

        let all = inventory.all();
        root.insert(
            ALL_GROUP.into(),
            json!({
                "hosts": all.members,
                "vars": serde_json::to_value(&all.vars)?,
                "children": inventory.children().iter().map(|g| g.name.as_str()).collect::<Vec<_>>(),
            }),
        );

        for group in inventory.children() {
            root.insert(
                group.name.clone(),
                json!({
                    "hosts": group.members,
                    "vars": serde_json::to_value(&group.vars)?,
                }),
            );
        }

        Ok(serde_json::to_string_pretty(&JsonValue::Object(root))?)
    }

    /// Render the `--host` JSON for one host (`{}` for unknown hosts)
    pub fn host_vars_json(inventory: &Inventory, host: &str) -> ProxResult<String> {
        let value = match inventory.host(host) {
            Some(h) => {
                TokenKind::Host.check(&h.name)?;
                Self::check_keys(&h.vars)?;
                serde_json::to_value(&h.vars)?
            }
            None => JsonValue::Object(JsonMap::new()),
        };
        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// Write the artifact atomically, returning whether its content changed
    ///
    /// Nothing is written when rendering fails.
    pub fn write(inventory: &Inventory, format: InventoryFormat, path: &Path) -> ProxResult<bool> {
        let rendered = Self::render(inventory, format)?;

        if let Ok(existing) = std::fs::read_to_string(path) {
            if existing == rendered {
                debug!(path = %path.display(), "inventory unchanged");
                return Ok(false);
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProxError::FileWriteError {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &rendered).map_err(|e| ProxError::FileWriteError {
            path: tmp.clone(),
            error: e.to_string(),
        })?;
        std::fs::rename(&tmp, path).map_err(|e| ProxError::FileWriteError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        debug!(path = %path.display(), bytes = rendered.len(), "inventory written");
        Ok(true)
    }
}

fn vars_mapping(vars: &VarMap) -> Value {
    Value::Mapping(
        vars.iter()
            .map(|(k, v)| (Value::String(k.clone()), v.clone()))
            .collect(),
    )
}

fn vars_or_null(vars: &VarMap) -> Value {
    if vars.is_empty() {
        Value::Null
    } else {
        vars_mapping(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use crate::inventory::model::tests::{config_with, node, three_node_config};
    use crate::inventory::{InventoryBuilder, InventoryDocument};
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_layout() {
        let inventory = InventoryBuilder::build(&three_node_config()).unwrap();
        let yaml = InventoryEmitter::to_yaml(&inventory).unwrap();

        assert!(yaml.starts_with(HEADER));
        let doc: Value = serde_yaml::from_str(&yaml).unwrap();
        let all = &doc["all"];
        assert_eq!(all["hosts"].as_mapping().unwrap().len(), 3);
        assert_eq!(all["vars"]["cluster_name"], Value::String("lab".into()));
        assert_eq!(
            all["children"]["worker"]["hosts"]
                .as_mapping()
                .unwrap()
                .keys()
                .map(|k| k.as_str().unwrap())
                .collect::<Vec<_>>(),
            vec!["wk-1", "wk-2"]
        );
    }

    #[test]
    fn test_emit_twice_is_byte_identical() {
        let config = three_node_config();
        let first = InventoryEmitter::to_yaml(&InventoryBuilder::build(&config).unwrap()).unwrap();
        let second = InventoryEmitter::to_yaml(&InventoryBuilder::build(&config).unwrap()).unwrap();
        assert_eq!(first, second);

        let first = InventoryEmitter::to_json(&InventoryBuilder::build(&config).unwrap()).unwrap();
        let second = InventoryEmitter::to_json(&InventoryBuilder::build(&config).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_emitted_yaml_reparses_to_same_structure() {
        let mut config = three_node_config();
        config.nodes[0].network.address = "10.0.0.11".parse().unwrap();
        let inventory = InventoryBuilder::build(&config).unwrap();

        let yaml = InventoryEmitter::to_yaml(&inventory).unwrap();
        let parsed = InventoryDocument::from_yaml(&yaml).unwrap();

        assert_eq!(parsed, InventoryDocument::from_inventory(&inventory));
    }

    #[test]
    fn test_illegal_host_name_is_rejected() {
        let config = config_with(vec![node("cp 1", 101, &[Role::ControlPlane])]);
        let inventory = InventoryBuilder::build(&config).unwrap();

        match InventoryEmitter::to_yaml(&inventory) {
            Err(ProxError::EmitError { kind, name, .. }) => {
                assert_eq!(kind, "host");
                assert_eq!(name, "cp 1");
            }
            other => panic!("expected EmitError, got {other:?}"),
        }
    }

    #[test]
    fn test_illegal_variable_name_is_rejected() {
        let mut cp = node("cp-1", 101, &[Role::ControlPlane]);
        cp.vars.insert("k3s-args".into(), Value::Null);
        let inventory = InventoryBuilder::build(&config_with(vec![cp])).unwrap();

        assert!(matches!(
            InventoryEmitter::to_json(&inventory),
            Err(ProxError::EmitError { .. })
        ));
    }

    #[test]
    fn test_token_rules() {
        assert!(TokenKind::Host.check("k3s-cp-1.lab").is_ok());
        assert!(TokenKind::Host.check("-cp").is_err());
        assert!(TokenKind::Host.check("cp:1").is_err());
        assert!(TokenKind::Group.check("control-plane").is_ok());
        assert!(TokenKind::Group.check("1st").is_err());
        assert!(TokenKind::Variable.check("vm_cores").is_ok());
        assert!(TokenKind::Variable.check("vm cores").is_err());
    }

    #[test]
    fn test_json_list_shape() {
        let inventory = InventoryBuilder::build(&three_node_config()).unwrap();
        let json: JsonValue = serde_json::from_str(&InventoryEmitter::to_json(&inventory).unwrap()).unwrap();

        assert_eq!(json["all"]["hosts"], json!(["cp-1", "wk-1", "wk-2"]));
        assert_eq!(json["all"]["children"], json!(["control-plane", "worker", "storage"]));
        assert_eq!(json["storage"]["hosts"], json!(["wk-2"]));
        assert_eq!(json["_meta"]["hostvars"]["wk-2"]["vmid"], json!(103));
    }

    #[test]
    fn test_host_vars_json() {
        let inventory = InventoryBuilder::build(&three_node_config()).unwrap();

        let known: JsonValue =
            serde_json::from_str(&InventoryEmitter::host_vars_json(&inventory, "cp-1").unwrap()).unwrap();
        assert_eq!(known["proxmox_node"], json!("pve1"));

        let unknown = InventoryEmitter::host_vars_json(&inventory, "nope").unwrap();
        assert_eq!(unknown.trim(), "{}");
    }

    #[test]
    fn test_write_reports_changes_and_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("inventory").join("hosts.yaml");
        let inventory = InventoryBuilder::build(&three_node_config()).unwrap();

        assert!(InventoryEmitter::write(&inventory, InventoryFormat::Yaml, &path).unwrap());
        assert!(!InventoryEmitter::write(&inventory, InventoryFormat::Yaml, &path).unwrap());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_failed_emit_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hosts.yaml");
        let inventory =
            InventoryBuilder::build(&config_with(vec![node("bad/name", 101, &[Role::ControlPlane])])).unwrap();

        assert!(InventoryEmitter::write(&inventory, InventoryFormat::Yaml, &path).is_err());
        assert!(!path.exists());
    }

    fn role_set() -> impl Strategy<Value = Vec<Role>> {
        prop::sample::subsequence(Role::ALL.to_vec(), 1..=3)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_every_host_in_all_and_its_role_groups(role_sets in prop::collection::vec(role_set(), 1..12)) {
            let nodes = role_sets
                .iter()
                .enumerate()
                .map(|(i, roles)| node(&format!("node-{}", i), 100 + i as u32, roles))
                .collect();
            let config = config_with(nodes);
            let inventory = InventoryBuilder::build(&config).unwrap();

            for (spec, roles) in config.nodes.iter().zip(&role_sets) {
                let groups = inventory.groups_of(&spec.id);
                prop_assert_eq!(groups[0], "all");
                prop_assert_eq!(groups.len(), roles.len() + 1);
                for role in roles {
                    prop_assert!(groups.contains(&role.group_name()));
                }
            }

            let yaml = InventoryEmitter::to_yaml(&inventory).unwrap();
            let again = InventoryEmitter::to_yaml(&InventoryBuilder::build(&config).unwrap()).unwrap();
            prop_assert_eq!(&yaml, &again);

            let parsed = InventoryDocument::from_yaml(&yaml).unwrap();
            prop_assert_eq!(parsed, InventoryDocument::from_inventory(&inventory));
        }
    }
}
