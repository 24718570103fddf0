// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Project layout
//!
//! Where the configuration, the inventory artifact, the playbooks and the
//! stage checkpoints live. Paths come from CLI flags or environment
//! variables and default to the conventional project tree.

use std::path::{Path, PathBuf};

use crate::config::ConfigLoader;

/// Default configuration document
pub const DEFAULT_CONFIG: &str = "config/cluster.yaml";
/// Default inventory artifact
pub const DEFAULT_INVENTORY: &str = "inventory/hosts.yaml";
/// Default playbook directory
pub const DEFAULT_PLAYBOOKS: &str = "playbooks";
/// Default checkpoint directory
pub const DEFAULT_STATE_DIR: &str = ".proxk3s/state";

/// Resolved project paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub config: PathBuf,
    pub inventory: PathBuf,
    pub playbooks: PathBuf,
    pub state_dir: PathBuf,
}

impl ProjectLayout {
    /// Conventional layout under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config: root.join(DEFAULT_CONFIG),
            inventory: root.join(DEFAULT_INVENTORY),
            playbooks: root.join(DEFAULT_PLAYBOOKS),
            state_dir: root.join(DEFAULT_STATE_DIR),
            root,
        }
    }

    /// Override the configuration path (relative paths resolve against the root)
    pub fn with_config(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            self.config = self.resolve(p);
        }
        self
    }

    /// Override the inventory path
    pub fn with_inventory(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            self.inventory = self.resolve(p);
        }
        self
    }

    /// Override the checkpoint directory
    pub fn with_state_dir(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            self.state_dir = self.resolve(p);
        }
        self
    }

    /// Override the playbook directory
    pub fn with_playbooks(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            self.playbooks = self.resolve(p);
        }
        self
    }

    /// Template paired with the configuration document
    pub fn template(&self) -> PathBuf {
        ConfigLoader::template_path_for(&self.config)
    }

    /// Resolve a playbook file name against the playbook directory
    pub fn playbook(&self, file: &Path) -> PathBuf {
        self.resolve_in(&self.playbooks, file)
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        self.resolve_in(&self.root, &path)
    }

    fn resolve_in(&self, base: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let layout = ProjectLayout::new("/srv/lab");
        assert_eq!(layout.config, PathBuf::from("/srv/lab/config/cluster.yaml"));
        assert_eq!(layout.template(), PathBuf::from("/srv/lab/config/cluster.template.yaml"));
        assert_eq!(layout.state_dir, PathBuf::from("/srv/lab/.proxk3s/state"));
    }

    #[test]
    fn test_overrides_resolve_against_root() {
        let layout = ProjectLayout::new("/srv/lab")
            .with_config(Some(PathBuf::from("alt.yaml")))
            .with_inventory(Some(PathBuf::from("/tmp/hosts.yaml")))
            .with_state_dir(None);

        assert_eq!(layout.config, PathBuf::from("/srv/lab/alt.yaml"));
        assert_eq!(layout.inventory, PathBuf::from("/tmp/hosts.yaml"));
        assert_eq!(layout.state_dir, PathBuf::from("/srv/lab/.proxk3s/state"));
        assert_eq!(
            layout.playbook(Path::new("0300-install-k3s.yaml")),
            PathBuf::from("/srv/lab/playbooks/0300-install-k3s.yaml")
        );
    }
}
