// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Package installation strategies
//!
//! The strategy is chosen once at setup time from the package managers
//! found on `PATH`.

use async_trait::async_trait;
use std::fmt;
use tokio::process::Command;

use crate::errors::{ProxError, ProxResult};

/// Supported package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Homebrew,
    Apt,
    Dnf,
    Pacman,
}

impl PackageManager {
    /// Binary to look for on `PATH`
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Homebrew => "brew",
            Self::Apt => "apt-get",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
        }
    }

    /// Whether installs need root
    pub fn needs_root(&self) -> bool {
        !matches!(self, Self::Homebrew)
    }

    /// Arguments installing `package` non-interactively
    pub fn install_args(&self, package: &str) -> Vec<String> {
        let args: &[&str] = match self {
            Self::Homebrew => &["install"],
            Self::Apt => &["install", "-y"],
            Self::Dnf => &["install", "-y"],
            Self::Pacman => &["-S", "--noconfirm"],
        };
        args.iter()
            .map(|a| a.to_string())
            .chain(std::iter::once(package.to_string()))
            .collect()
    }

    /// Preference order for the current platform
    pub fn candidates() -> &'static [PackageManager] {
        if cfg!(target_os = "macos") {
            &[Self::Homebrew]
        } else {
            &[Self::Apt, Self::Dnf, Self::Pacman, Self::Homebrew]
        }
    }

    /// First candidate whose binary `is_available` reports
    pub fn detect_with(is_available: impl Fn(&str) -> bool) -> Option<Self> {
        Self::candidates()
            .iter()
            .copied()
            .find(|pm| is_available(pm.binary()))
    }

    /// First candidate present on `PATH`
    pub fn detect() -> Option<Self> {
        Self::detect_with(|bin| which::which(bin).is_ok())
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Homebrew => "Homebrew",
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
        };
        write!(f, "{}", name)
    }
}

/// A way of installing a package on this machine
#[async_trait]
pub trait InstallStrategy: Send + Sync {
    /// Short description for messages
    fn describe(&self) -> String;

    /// Full command line installing `package`, when one is known
    fn command(&self, package: &str) -> Option<Vec<String>>;

    /// Install `package`
    async fn install(&self, package: &str) -> ProxResult<()>;
}

/// Install through a detected package manager
pub struct PackageManagerStrategy {
    manager: PackageManager,
    use_sudo: bool,
}

impl PackageManagerStrategy {
    pub fn new(manager: PackageManager, use_sudo: bool) -> Self {
        Self { manager, use_sudo }
    }

    pub fn manager(&self) -> PackageManager {
        self.manager
    }
}

#[async_trait]
impl InstallStrategy for PackageManagerStrategy {
    fn describe(&self) -> String {
        self.manager.to_string()
    }

    fn command(&self, package: &str) -> Option<Vec<String>> {
        let mut cmd = Vec::new();
        if self.use_sudo && self.manager.needs_root() {
            cmd.push("sudo".to_string());
        }
        cmd.push(self.manager.binary().to_string());
        cmd.extend(self.manager.install_args(package));
        Some(cmd)
    }

    async fn install(&self, package: &str) -> ProxResult<()> {
        let Some(cmd) = self.command(package) else {
            return Err(ProxError::tool_not_found(self.manager.binary()));
        };
        let (program, args) = cmd.split_first().ok_or_else(|| ProxError::Io {
            message: "empty install command".to_string(),
        })?;

        tracing::debug!(command = %cmd.join(" "), "running installer");

        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| ProxError::ToolExecutionFailed {
                tool: program.clone(),
                error: e.to_string(),
                help: None,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ProxError::ToolExecutionFailed {
                tool: self.manager.binary().to_string(),
                error: format!(
                    "installing '{}' exited with code {}",
                    package,
                    status.code().unwrap_or(-1)
                ),
                help: Some(format!("Try running '{}' by hand", cmd.join(" "))),
            })
        }
    }
}

/// No supported package manager; the operator installs by hand
pub struct ManualStrategy;

#[async_trait]
impl InstallStrategy for ManualStrategy {
    fn describe(&self) -> String {
        "manual installation".to_string()
    }

    fn command(&self, _package: &str) -> Option<Vec<String>> {
        None
    }

    async fn install(&self, package: &str) -> ProxResult<()> {
        Err(ProxError::CredentialHelperMissing {
            helper: package.to_string(),
            help: Some(format!(
                "No supported package manager (brew, apt-get, dnf, pacman) was found; install '{}' manually",
                package
            )),
        })
    }
}

/// Strategy for this machine
pub fn select_strategy() -> Box<dyn InstallStrategy> {
    match PackageManager::detect() {
        Some(manager) => Box::new(PackageManagerStrategy::new(manager, true)),
        None => Box::new(ManualStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_commands() {
        let apt = PackageManagerStrategy::new(PackageManager::Apt, true);
        assert_eq!(
            apt.command("pass").unwrap().join(" "),
            "sudo apt-get install -y pass"
        );

        let brew = PackageManagerStrategy::new(PackageManager::Homebrew, true);
        assert_eq!(brew.command("pass").unwrap().join(" "), "brew install pass");

        let pacman = PackageManagerStrategy::new(PackageManager::Pacman, false);
        assert_eq!(
            pacman.command("pass").unwrap().join(" "),
            "pacman -S --noconfirm pass"
        );

        assert!(ManualStrategy.command("pass").is_none());
    }

    #[test]
    fn test_detect_with() {
        assert_eq!(PackageManager::detect_with(|_| false), None);

        let only_brew = PackageManager::detect_with(|bin| bin == "brew");
        assert_eq!(only_brew, Some(PackageManager::Homebrew));

        if !cfg!(target_os = "macos") {
            let both = PackageManager::detect_with(|bin| bin == "dnf" || bin == "brew");
            assert_eq!(both, Some(PackageManager::Dnf));
        }
    }

    #[tokio::test]
    async fn test_manual_strategy_reports_missing_helper() {
        let err = ManualStrategy.install("pass").await.unwrap_err();
        assert!(matches!(err, ProxError::CredentialHelperMissing { .. }));
    }
}
