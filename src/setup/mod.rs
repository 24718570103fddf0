// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Workstation setup
//!
//! Capabilities the pipeline relies on but never installs itself: the
//! credential helper holding the Proxmox token secret and the automation
//! runtime on `PATH`.

mod install;

pub use install::{
    select_strategy, InstallStrategy, ManualStrategy, PackageManager, PackageManagerStrategy,
};

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use tokio::process::Command;

use crate::errors::{ProxError, ProxResult, RecoverySuggestion};

/// Environment variable overriding the credential helper lookup
pub const TOKEN_SECRET_ENV: &str = "PROXK3S_TOKEN_SECRET";

/// Automation runtime binary
pub const RUNTIME_TOOL: &str = "ansible-playbook";

/// A secret value that never prints itself
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Password-caching tool holding the token secret
#[async_trait]
pub trait CredentialHelper: Send + Sync {
    /// Binary name
    fn binary(&self) -> &str;

    /// Whether the helper can be invoked
    fn is_present(&self) -> bool;

    /// Read the secret stored under `reference`
    async fn read_secret(&self, reference: &str) -> ProxResult<Secret>;
}

/// Helper following the `<helper> show <ref>` convention (`pass`, `gopass`)
pub struct ShowCommandHelper {
    binary: String,
}

impl ShowCommandHelper {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }
}

#[async_trait]
impl CredentialHelper for ShowCommandHelper {
    fn binary(&self) -> &str {
        &self.binary
    }

    fn is_present(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    async fn read_secret(&self, reference: &str) -> ProxResult<Secret> {
        let output = Command::new(&self.binary)
            .arg("show")
            .arg(reference)
            .output()
            .await
            .map_err(|e| ProxError::SecretUnavailable {
                reference: reference.to_string(),
                reason: format!("could not run '{}': {}", self.binary, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProxError::SecretUnavailable {
                reference: reference.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        first_line_secret(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ProxError::SecretUnavailable {
                reference: reference.to_string(),
                reason: "entry is empty".to_string(),
            }
        })
    }
}

/// First line of helper output (the `pass` convention)
pub fn first_line_secret(output: &str) -> Option<Secret> {
    output
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Secret::new)
}

/// Whether the credential helper is present, and what was done about it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperStatus {
    Present,
    Installed,
}

/// Ensure the credential helper is present, installing it when asked
pub async fn ensure_credential_helper(
    helper: &dyn CredentialHelper,
    strategy: &dyn InstallStrategy,
    install: bool,
) -> ProxResult<HelperStatus> {
    if helper.is_present() {
        return Ok(HelperStatus::Present);
    }

    if !install {
        return Err(helper_missing(helper.binary(), strategy));
    }

    tracing::info!(helper = helper.binary(), via = %strategy.describe(), "installing credential helper");
    strategy.install(helper.binary()).await?;

    if helper.is_present() {
        Ok(HelperStatus::Installed)
    } else {
        Err(helper_missing(helper.binary(), strategy))
    }
}

/// `CredentialHelperMissing` with the install command for this platform
pub fn helper_missing(binary: &str, strategy: &dyn InstallStrategy) -> ProxError {
    let command = strategy.command(binary).map(|c| c.join(" "));
    ProxError::CredentialHelperMissing {
        helper: binary.to_string(),
        help: Some(
            RecoverySuggestion::install_credential_helper(binary, command.as_deref()).to_string(),
        ),
    }
}

/// Resolve the Proxmox token secret: the environment override wins, then the helper
pub async fn resolve_token_secret(
    helper: &dyn CredentialHelper,
    reference: &str,
    env_override: Option<String>,
) -> ProxResult<Secret> {
    if let Some(value) = env_override.filter(|v| !v.trim().is_empty()) {
        tracing::debug!("token secret taken from {}", TOKEN_SECRET_ENV);
        return Ok(Secret::new(value.trim()));
    }
    helper.read_secret(reference).await
}

/// Locate a required tool on `PATH`
pub fn check_tool(tool: &str) -> ProxResult<PathBuf> {
    which::which(tool).map_err(|_| ProxError::tool_not_found(tool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeHelper {
        present: AtomicBool,
    }

    #[async_trait]
    impl CredentialHelper for FakeHelper {
        fn binary(&self) -> &str {
            "pass"
        }

        fn is_present(&self) -> bool {
            self.present.load(Ordering::SeqCst)
        }

        async fn read_secret(&self, _reference: &str) -> ProxResult<Secret> {
            Ok(Secret::new("from-helper"))
        }
    }

    /// Strategy that "installs" by flipping the fake helper on
    struct FlipStrategy<'a>(&'a FakeHelper);

    #[async_trait]
    impl InstallStrategy for FlipStrategy<'_> {
        fn describe(&self) -> String {
            "test".into()
        }

        fn command(&self, package: &str) -> Option<Vec<String>> {
            Some(vec!["install".into(), package.into()])
        }

        async fn install(&self, _package: &str) -> ProxResult<()> {
            self.0.present.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("s3cr3t");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.expose(), "s3cr3t");
    }

    #[test]
    fn test_first_line_secret() {
        assert_eq!(
            first_line_secret("abc-123\nurl: https://pve\n").unwrap().expose(),
            "abc-123"
        );
        assert!(first_line_secret("").is_none());
        assert!(first_line_secret("\nsecond").is_none());
    }

    #[tokio::test]
    async fn test_missing_helper_is_reported() {
        let helper = FakeHelper {
            present: AtomicBool::new(false),
        };
        let strategy = FlipStrategy(&helper);

        let err = ensure_credential_helper(&helper, &strategy, false)
            .await
            .unwrap_err();
        match err {
            ProxError::CredentialHelperMissing { helper, help } => {
                assert_eq!(helper, "pass");
                assert!(help.unwrap().contains("install pass"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_install_when_asked() {
        let helper = FakeHelper {
            present: AtomicBool::new(false),
        };
        let strategy = FlipStrategy(&helper);

        let status = ensure_credential_helper(&helper, &strategy, true).await.unwrap();
        assert_eq!(status, HelperStatus::Installed);
        assert_eq!(
            ensure_credential_helper(&helper, &strategy, false).await.unwrap(),
            HelperStatus::Present
        );
    }

    #[tokio::test]
    async fn test_env_override_wins() {
        let helper = FakeHelper {
            present: AtomicBool::new(true),
        };

        let secret = resolve_token_secret(&helper, "proxmox/token", Some(" env-value ".into()))
            .await
            .unwrap();
        assert_eq!(secret.expose(), "env-value");

        let secret = resolve_token_secret(&helper, "proxmox/token", Some("".into()))
            .await
            .unwrap();
        assert_eq!(secret.expose(), "from-helper");
    }
}
