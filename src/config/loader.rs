// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Configuration loader
//!
//! Reads the configuration document, refuses unfilled templates, maps serde
//! failures onto the offending field and runs semantic validation. Loading
//! never touches the filesystem beyond reading the document.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::{debug, warn};

use super::{ClusterConfig, ConfigValidator};
use crate::errors::{ProxError, ProxResult, RecoverySuggestion};

/// Marker left in template values that the operator must replace
pub const PLACEHOLDER: &str = "CHANGE_ME";

/// A validated configuration together with its provenance
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Parsed, validated document
    pub config: ClusterConfig,
    /// Where it was read from
    pub path: PathBuf,
    /// BLAKE3 digest of the raw bytes
    pub digest: String,
    /// Non-fatal findings
    pub warnings: Vec<String>,
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate the document at `path`
    pub fn load(path: &Path) -> ProxResult<LoadedConfig> {
        if Self::is_template_path(path) {
            return Err(ProxError::UnconfiguredTemplate {
                path: path.to_path_buf(),
                field: "<file name>".into(),
            });
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Self::not_found(path));
            }
            Err(e) => {
                return Err(ProxError::ConfigNotFound {
                    path: path.to_path_buf(),
                    help: Some(format!("The file exists but cannot be read: {}", e)),
                });
            }
        };

        debug!(path = %path.display(), bytes = content.len(), "read configuration");
        Self::from_str(&content, path)
    }

    /// Parse and validate a document already in memory
    pub fn from_str(content: &str, origin: &Path) -> ProxResult<LoadedConfig> {
        let raw: Value = serde_yaml::from_str(content).map_err(|e| ProxError::ConfigSchemaError {
            field: "<document>".into(),
            expected: "well-formed YAML".into(),
            help: Some(e.to_string()),
        })?;

        if let Some(field) = find_placeholder(&raw, "") {
            return Err(ProxError::UnconfiguredTemplate {
                path: origin.to_path_buf(),
                field,
            });
        }

        // Parse from text again so serde_yaml reports field paths
        let config: ClusterConfig = serde_yaml::from_str(content).map_err(schema_error)?;

        let report = ConfigValidator::validate(&config);
        if let Some(issue) = report.issues.into_iter().next() {
            return Err(issue.into_error());
        }

        for warning in &report.warnings {
            warn!("{}", warning);
        }

        Ok(LoadedConfig {
            config,
            path: origin.to_path_buf(),
            digest: blake3::hash(content.as_bytes()).to_hex().to_string(),
            warnings: report.warnings,
        })
    }

    /// Template path paired with a live configuration path
    ///
    /// `config/cluster.yaml` pairs with `config/cluster.template.yaml`.
    pub fn template_path_for(path: &Path) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "cluster".to_string());
        let ext = path
            .extension()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "yaml".to_string());
        path.with_file_name(format!("{}.template.{}", stem, ext))
    }

    /// Whether a path names a template rather than a live document
    pub fn is_template_path(path: &Path) -> bool {
        path.file_name()
            .map(|n| {
                let n = n.to_string_lossy();
                n.ends_with(".template.yaml") || n.ends_with(".template.yml")
            })
            .unwrap_or(false)
    }

    fn not_found(path: &Path) -> ProxError {
        let template = Self::template_path_for(path);
        let suggestion = if template.exists() {
            RecoverySuggestion::copy_template(&template, path)
        } else {
            RecoverySuggestion::init_project()
        };

        ProxError::ConfigNotFound {
            path: path.to_path_buf(),
            help: Some(suggestion.to_string()),
        }
    }
}

/// Depth-first search for the first string value carrying the placeholder
fn find_placeholder(value: &Value, path: &str) -> Option<String> {
    match value {
        Value::String(s) if s.contains(PLACEHOLDER) => {
            Some(if path.is_empty() { "<document>".into() } else { path.to_string() })
        }
        Value::Mapping(map) => map.iter().find_map(|(k, v)| {
            let key = match k {
                Value::String(s) => s.clone(),
                other => serde_yaml::to_string(other)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default(),
            };
            let child = if path.is_empty() { key } else { format!("{}.{}", path, key) };
            find_placeholder(v, &child)
        }),
        Value::Sequence(seq) => seq
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_placeholder(v, &format!("{}[{}]", path, i))),
        Value::Tagged(tagged) => find_placeholder(&tagged.value, path),
        _ => None,
    }
}

/// Map a serde_yaml error onto the field it concerns
///
/// serde_yaml renders errors as `path: message at line L column C`.
fn schema_error(e: serde_yaml::Error) -> ProxError {
    let location = e
        .location()
        .map(|l| format!("line {}, column {}", l.line(), l.column()));
    let rendered = e.to_string();
    let message = match rendered.rfind(" at line ") {
        Some(pos) => &rendered[..pos],
        None => rendered.as_str(),
    };

    let (path, message) = match message.split_once(": ") {
        Some((path, rest)) if !path.contains(' ') => (Some(path), rest),
        _ => (None, message),
    };

    let (field, expected) = match message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.strip_suffix('`'))
    {
        Some(missing) => (
            match path {
                Some(p) => format!("{}.{}", p, missing),
                None => missing.to_string(),
            },
            "this required field to be present".to_string(),
        ),
        None => (
            path.unwrap_or("<document>").to_string(),
            message.to_string(),
        ),
    };

    ProxError::ConfigSchemaError {
        field,
        expected,
        help: location.map(|l| format!("See {} of the configuration document", l)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) const VALID: &str = r#"
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
"#;

    #[test]
    fn test_load_valid_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.yaml");
        std::fs::write(&path, VALID).unwrap();

        let loaded = ConfigLoader::load(&path).unwrap();
        assert_eq!(loaded.config.nodes.len(), 1);
        assert_eq!(loaded.digest.len(), 64);
        assert_eq!(loaded.path, path);
    }

    #[test]
    fn test_missing_document_points_at_template() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.yaml");
        std::fs::write(temp.path().join("cluster.template.yaml"), VALID).unwrap();

        match ConfigLoader::load(&path) {
            Err(ProxError::ConfigNotFound { help, .. }) => {
                assert!(help.unwrap().contains("cluster.template.yaml"));
            }
            other => panic!("expected ConfigNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_document_without_template_suggests_init() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.yaml");

        match ConfigLoader::load(&path) {
            Err(ProxError::ConfigNotFound { help, .. }) => {
                assert!(help.unwrap().contains("proxk3s init"));
            }
            other => panic!("expected ConfigNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_template_file_is_never_loaded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.template.yaml");
        std::fs::write(&path, VALID).unwrap();

        assert!(matches!(
            ConfigLoader::load(&path),
            Err(ProxError::UnconfiguredTemplate { .. })
        ));
    }

    #[test]
    fn test_placeholder_is_reported_with_path() {
        let yaml = VALID.replace("api_host: pve.lan", "api_host: CHANGE_ME");

        match ConfigLoader::from_str(&yaml, Path::new("cluster.yaml")) {
            Err(ProxError::UnconfiguredTemplate { field, .. }) => {
                assert_eq!(field, "proxmox.api_host");
            }
            other => panic!("expected UnconfiguredTemplate, got {other:?}"),
        }
    }

    #[test]
    fn test_placeholder_inside_node_list() {
        let yaml = VALID.replace("proxmox_node: pve1", "proxmox_node: CHANGE_ME");

        match ConfigLoader::from_str(&yaml, Path::new("cluster.yaml")) {
            Err(ProxError::UnconfiguredTemplate { field, .. }) => {
                assert_eq!(field, "nodes[0].proxmox_node");
            }
            other => panic!("expected UnconfiguredTemplate, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_field_names_the_field() {
        let yaml = VALID.replace("    vmid: 101\n", "");

        match ConfigLoader::from_str(&yaml, Path::new("cluster.yaml")) {
            Err(ProxError::ConfigSchemaError { field, .. }) => {
                assert!(field.ends_with("vmid"), "field was {field}");
            }
            other => panic!("expected ConfigSchemaError, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_role_names_the_field() {
        let yaml = VALID.replace("[control-plane]", "[master]");

        match ConfigLoader::from_str(&yaml, Path::new("cluster.yaml")) {
            Err(ProxError::ConfigSchemaError { field, expected, .. }) => {
                assert!(field.contains("roles"), "field was {field}");
                assert!(expected.contains("control-plane"));
            }
            other => panic!("expected ConfigSchemaError, got {other:?}"),
        }
    }

    #[test]
    fn test_semantic_issue_fails_load() {
        let yaml = VALID.replace("address: 10.0.0.11", "address: 10.9.0.11");

        match ConfigLoader::from_str(&yaml, Path::new("cluster.yaml")) {
            Err(ProxError::ConfigSchemaError { field, .. }) => {
                assert_eq!(field, "nodes[0].network.address");
            }
            other => panic!("expected ConfigSchemaError, got {other:?}"),
        }
    }

    #[test]
    fn test_template_path_for() {
        assert_eq!(
            ConfigLoader::template_path_for(Path::new("config/cluster.yaml")),
            PathBuf::from("config/cluster.template.yaml")
        );
        assert!(ConfigLoader::is_template_path(Path::new("a/b.template.yml")));
        assert!(!ConfigLoader::is_template_path(Path::new("a/b.yaml")));
    }

    #[test]
    fn test_digest_is_stable() {
        let a = ConfigLoader::from_str(VALID, Path::new("a.yaml")).unwrap();
        let b = ConfigLoader::from_str(VALID, Path::new("b.yaml")).unwrap();
        assert_eq!(a.digest, b.digest);
    }
}
