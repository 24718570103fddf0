// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! API token bootstrap
//!
//! Creates the automation user, its API token and the token's ACL with
//! `pveum`. Proxmox shows a token secret exactly once, so an existing token
//! is an error rather than something to reuse.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::{CommandOutput, CommandTransport};
use crate::errors::{ProxError, ProxResult};
use crate::setup::Secret;

/// What to create on the Proxmox side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    /// User principal (`name@realm`)
    pub user: String,
    pub token_name: String,
    /// Token gets its own ACLs instead of the user's
    pub privsep: bool,
    pub role: String,
    pub acl_paths: Vec<String>,
    pub comment: String,
    /// Login password for the user, set on creation or reset if it exists
    pub password: Option<Secret>,
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self {
            user: "ansible@pve".to_string(),
            token_name: "ansible".to_string(),
            privsep: true,
            role: "PVEAdmin".to_string(),
            acl_paths: vec!["/".to_string()],
            comment: "Automation user (created by proxk3s)".to_string(),
            password: None,
        }
    }
}

impl TokenRequest {
    /// Full token id (`user@realm!name`)
    pub fn token_id(&self) -> String {
        format!("{}!{}", self.user, self.token_name)
    }
}

/// A freshly created token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token_id: String,
    pub secret: Secret,
}

/// Result of a bootstrap
#[derive(Debug, Clone)]
pub struct TokenOutcome {
    pub user_created: bool,
    /// Password of an existing user was reset
    pub password_reset: bool,
    pub token: IssuedToken,
}

/// Runs the bootstrap through a transport
pub struct TokenBootstrap<'a> {
    transport: &'a dyn CommandTransport,
}

impl<'a> TokenBootstrap<'a> {
    pub fn new(transport: &'a dyn CommandTransport) -> Self {
        Self { transport }
    }

    /// User, token, then ACLs
    pub async fn run(&self, request: &TokenRequest) -> ProxResult<TokenOutcome> {
        let user_created = self.ensure_user(request).await?;
        let password_reset = match &request.password {
            Some(password) if !user_created => {
                self.set_password(&request.user, password).await?;
                true
            }
            _ => false,
        };
        let token = self.create_token(request).await?;
        self.assign_acls(request, &token).await?;
        Ok(TokenOutcome {
            user_created,
            password_reset,
            token,
        })
    }

    /// Create the user unless it exists; returns whether it was created
    pub async fn ensure_user(&self, request: &TokenRequest) -> ProxResult<bool> {
        let (listing, used_json) = self.prefer_json("pveum user list").await?;
        if !listing.success() {
            return Err(failed("failed to list users", &listing.output));
        }

        if user_listed(&listing.output, used_json, &request.user) {
            tracing::debug!(user = %request.user, "user exists");
            return Ok(false);
        }

        let mut cmd = format!(
            "pveum user add {} --comment {}",
            quote(&request.user),
            quote(&request.comment)
        );
        if let Some(password) = &request.password {
            cmd.push_str(&format!(" --password {}", quote(password.expose())));
        }
        let out = self.transport.run(&cmd).await?;
        if !out.success() && !out.output.to_lowercase().contains("already exists") {
            return Err(failed("failed to create user", &out.output));
        }
        Ok(true)
    }

    /// Reset an existing user's password
    ///
    /// Older `pveum` releases lack `user modify --password`; `pveum passwd`
    /// is tried next and the last failure is reported.
    pub async fn set_password(&self, user: &str, password: &Secret) -> ProxResult<()> {
        let attempts = [
            format!("pveum user modify {} --password {}", quote(user), quote(password.expose())),
            format!("pveum passwd {} --password {}", quote(user), quote(password.expose())),
        ];

        let mut last = String::new();
        for cmd in &attempts {
            let out = self.transport.run(cmd).await?;
            if out.success() {
                return Ok(());
            }
            last = out.output;
        }
        Err(failed(&format!("failed to set the password of {}", user), &last))
    }

    /// Create the token and capture its secret
    pub async fn create_token(&self, request: &TokenRequest) -> ProxResult<IssuedToken> {
        let base = format!(
            "pveum user token add {} {} --privsep {}",
            quote(&request.user),
            quote(&request.token_name),
            if request.privsep { 1 } else { 0 }
        );
        let (out, used_json) = self.prefer_json(&base).await?;

        if !out.success() {
            if out.output.to_lowercase().contains("already exists") {
                return Err(ProxError::TokenBootstrapFailed {
                    reason: format!("token '{}' already exists", request.token_id()),
                    help: Some(format!(
                        "Proxmox never shows a secret twice. Delete it with 'pveum user token remove {} {}' or pick another --token-name",
                        request.user, request.token_name
                    )),
                });
            }
            return Err(failed("failed to create token", &out.output));
        }

        let secret = parse_token_secret(&out.output, used_json).ok_or_else(|| {
            ProxError::TokenBootstrapFailed {
                reason: format!(
                    "token created but its secret was not found in the output:\n{}",
                    out.output
                ),
                help: Some("Copy the secret from the output above now; it is shown only once".into()),
            }
        })?;

        Ok(IssuedToken {
            token_id: request.token_id(),
            secret: Secret::new(secret),
        })
    }

    /// Grant the role on every ACL path, to the token or the user
    pub async fn assign_acls(&self, request: &TokenRequest, token: &IssuedToken) -> ProxResult<()> {
        let (kind, principal) = if request.privsep {
            ("-token", token.token_id.as_str())
        } else {
            ("-user", request.user.as_str())
        };

        for path in &request.acl_paths {
            let cmd = format!(
                "pveum aclmod {} {} {} -role {}",
                quote(path),
                kind,
                quote(principal),
                quote(&request.role)
            );
            let out = self.transport.run(&cmd).await?;
            if !out.success() {
                return Err(failed(&format!("failed to assign ACL on {}", path), &out.output));
            }
        }
        Ok(())
    }

    /// Try JSON output flags first, falling back to plain output
    async fn prefer_json(&self, base: &str) -> ProxResult<(CommandOutput, bool)> {
        for flag in ["--output-format json", "--format json"] {
            let out = self.transport.run(&format!("{} {}", base, flag)).await?;
            if out.success() {
                let is_json = serde_json::from_str::<Value>(&out.output).is_ok();
                return Ok((out, is_json));
            }
        }
        Ok((self.transport.run(base).await?, false))
    }
}

fn failed(what: &str, output: &str) -> ProxError {
    ProxError::TokenBootstrapFailed {
        reason: format!("{}:\n{}", what, output.trim_end()),
        help: None,
    }
}

/// Minimum length accepted for the user's password
pub const MIN_PASSWORD_LEN: usize = 8;

/// Check a password and its confirmation
pub fn check_password(password: &str, confirmation: &str) -> ProxResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ProxError::TokenBootstrapFailed {
            reason: format!("password must be at least {} characters", MIN_PASSWORD_LEN),
            help: None,
        });
    }
    if password != confirmation {
        return Err(ProxError::TokenBootstrapFailed {
            reason: "passwords do not match".to_string(),
            help: None,
        });
    }
    Ok(())
}

/// Single-quote for a POSIX shell
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_!".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

/// Whether `pveum user list` output names the user
pub fn user_listed(output: &str, used_json: bool, user: &str) -> bool {
    if used_json {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(output) {
            return items
                .iter()
                .any(|item| item.get("userid").and_then(Value::as_str) == Some(user));
        }
    }
    output.contains(user)
}

/// Secret from `pveum user token add` output
pub fn parse_token_secret(output: &str, used_json: bool) -> Option<String> {
    static FALLBACK: OnceLock<Regex> = OnceLock::new();

    if used_json {
        let from_json = serde_json::from_str::<Value>(output).ok().and_then(|data| {
            let item = match data {
                Value::Array(items) => items.into_iter().next()?,
                other => other,
            };
            item.get("value")
                .or_else(|| item.get("secret"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        if from_json.is_some() {
            return from_json;
        }
    }

    let re = FALLBACK.get_or_init(|| {
        Regex::new(r"(?:value|Token value)\s*:\s*([A-Za-z0-9.\-_]+)")
            .unwrap_or_else(|e| panic!("invalid secret pattern: {}", e))
    });
    re.captures(output).map(|c| c[1].to_string())
}

/// `proxmox:` block for `config/cluster.yaml`
pub fn config_snippet(api_host: &str, request: &TokenRequest, secret_ref: &str) -> String {
    format!(
        "proxmox:\n  api_host: \"{}\"\n  api_user: \"{}\"\n  api_token_id: \"{}\"\n  api_token_secret_ref: \"{}\"\n  validate_certs: false\n",
        api_host,
        request.user,
        request.token_id(),
        secret_ref
    )
}
