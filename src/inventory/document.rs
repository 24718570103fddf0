// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Structural view of an emitted inventory
//!
//! Reads a YAML inventory back into groups, hosts and variables so an
//! artifact on disk can be compared with what the configuration implies.

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use super::{Inventory, ALL_GROUP};
use crate::config::VarMap;
use crate::errors::{ProxError, ProxResult};

/// Groups, hosts and variables of an inventory, without comments or layout
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InventoryDocument {
    /// Group name to members, in file order
    pub groups: BTreeMap<String, Vec<String>>,
    /// Host name to variables
    pub host_vars: BTreeMap<String, VarMap>,
    /// Group name to variables (groups without variables are absent)
    pub group_vars: BTreeMap<String, VarMap>,
}

impl InventoryDocument {
    /// Structural content of an in-memory inventory
    pub fn from_inventory(inventory: &Inventory) -> Self {
        let mut doc = Self::default();

        for group in &inventory.groups {
            doc.groups.insert(group.name.clone(), group.members.clone());
            if !group.vars.is_empty() {
                doc.group_vars.insert(group.name.clone(), group.vars.clone());
            }
        }
        for host in &inventory.hosts {
            doc.host_vars.insert(host.name.clone(), host.vars.clone());
        }

        doc
    }

    /// Parse a YAML inventory artifact
    pub fn from_yaml(yaml: &str) -> ProxResult<Self> {
        let root: Value = serde_yaml::from_str(yaml).map_err(|e| ProxError::InventoryParse {
            reason: e.to_string(),
        })?;

        let all = root
            .get(ALL_GROUP)
            .and_then(Value::as_mapping)
            .ok_or_else(|| parse_error("no top-level 'all' group"))?;

        let mut doc = Self::default();

        let hosts = section(all, "hosts", ALL_GROUP)?;
        let mut members = Vec::new();
        for (name, vars) in hosts.iter() {
            let name = key(name, ALL_GROUP)?;
            doc.host_vars.insert(name.clone(), var_map(vars, &name)?);
            members.push(name);
        }
        doc.groups.insert(ALL_GROUP.to_string(), members);
        if let Some(vars) = all.get("vars") {
            doc.group_vars.insert(ALL_GROUP.to_string(), var_map(vars, ALL_GROUP)?);
        }

        if let Some(children) = all.get("children") {
            let children = children
                .as_mapping()
                .ok_or_else(|| parse_error("'all.children' is not a mapping"))?;

            for (name, body) in children {
                let name = key(name, "all.children")?;
                let body = body
                    .as_mapping()
                    .ok_or_else(|| parse_error(&format!("group '{}' is not a mapping", name)))?;

                let mut members = Vec::new();
                for (host, _) in section(body, "hosts", &name)? {
                    let host = key(host, &name)?;
                    if !doc.host_vars.contains_key(&host) {
                        return Err(parse_error(&format!(
                            "group '{}' lists host '{}' which is not under 'all.hosts'",
                            name, host
                        )));
                    }
                    members.push(host);
                }

                if let Some(vars) = body.get("vars") {
                    doc.group_vars.insert(name.clone(), var_map(vars, &name)?);
                }
                doc.groups.insert(name, members);
            }
        }

        Ok(doc)
    }

    /// Hosts listed in a group
    pub fn members(&self, group: &str) -> &[String] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn parse_error(reason: &str) -> ProxError {
    ProxError::InventoryParse {
        reason: reason.to_string(),
    }
}

fn section<'a>(body: &'a Mapping, name: &str, owner: &str) -> ProxResult<&'a Mapping> {
    static EMPTY: std::sync::OnceLock<Mapping> = std::sync::OnceLock::new();

    match body.get(name) {
        None | Some(Value::Null) => Ok(EMPTY.get_or_init(Mapping::new)),
        Some(Value::Mapping(m)) => Ok(m),
        Some(_) => Err(parse_error(&format!("'{}.{}' is not a mapping", owner, name))),
    }
}

fn key(value: &Value, owner: &str) -> ProxResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| parse_error(&format!("non-string key under '{}'", owner)))
}

fn var_map(value: &Value, owner: &str) -> ProxResult<VarMap> {
    match value {
        Value::Null => Ok(VarMap::new()),
        Value::Mapping(m) => m
            .iter()
            .map(|(k, v)| Ok((key(k, owner)?, v.clone())))
            .collect(),
        _ => Err(parse_error(&format!("variables of '{}' are not a mapping", owner))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hand_written_inventory() {
        let yaml = r#"
all:
  vars:
    cluster_name: lab
  hosts:
    cp-1:
      vmid: 101
    wk-1:
  children:
    control-plane:
      hosts:
        cp-1:
    worker:
      vars:
        tier: apps
      hosts:
        wk-1:
"#;
        let doc = InventoryDocument::from_yaml(yaml).unwrap();

        assert_eq!(doc.members("all"), ["cp-1", "wk-1"]);
        assert_eq!(doc.members("worker"), ["wk-1"]);
        assert!(doc.members("storage").is_empty());
        assert!(doc.host_vars["wk-1"].is_empty());
        assert_eq!(doc.group_vars["worker"]["tier"], Value::String("apps".into()));
    }

    #[test]
    fn test_orphan_group_member_is_rejected() {
        let yaml = r#"
all:
  hosts:
    cp-1:
  children:
    worker:
      hosts:
        ghost:
"#;
        assert!(matches!(
            InventoryDocument::from_yaml(yaml),
            Err(ProxError::InventoryParse { .. })
        ));
    }

    #[test]
    fn test_missing_all_group_is_rejected() {
        assert!(InventoryDocument::from_yaml("web:\n  hosts: {}\n").is_err());
    }
}
