// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Token command - create the Proxmox automation user and API token

use clap::Args;
use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::config::CredentialSettings;
use crate::errors::ProxError;
use crate::layout::ProjectLayout;
use crate::proxmox::token::{check_password, config_snippet, TokenBootstrap, TokenRequest};
use crate::proxmox::{CommandTransport, LocalTransport, SshTransport};
use crate::setup::{check_tool, Secret};

/// Prompts before giving up on a password
const PASSWORD_ATTEMPTS: usize = 3;

/// Arguments of `proxk3s token`
#[derive(Args, Debug, Clone)]
pub struct TokenArgs {
    /// Proxmox node to run `pveum` on over SSH
    #[clap(long, required_unless_present = "local")]
    pub host: Option<String>,

    /// Run `pveum` on this machine instead
    #[clap(long, conflicts_with = "host")]
    pub local: bool,

    /// SSH user on the Proxmox node
    #[clap(long, default_value = "root")]
    pub ssh_user: String,

    /// SSH port
    #[clap(long, default_value = "22")]
    pub port: u16,

    /// SSH identity file
    #[clap(long, value_name = "FILE")]
    pub identity: Option<PathBuf>,

    /// Automation user (`name@realm`)
    #[clap(long, default_value = "ansible@pve")]
    pub user: String,

    /// Token name
    #[clap(long, default_value = "ansible")]
    pub token_name: String,

    /// Role granted to the token
    #[clap(long, default_value = "PVEAdmin")]
    pub role: String,

    /// ACL path (repeatable)
    #[clap(long = "acl", value_name = "PATH", default_value = "/")]
    pub acl_paths: Vec<String>,

    /// Let the token share the user's permissions
    #[clap(long)]
    pub no_privsep: bool,

    /// API host written into the configuration snippet (defaults to --host)
    #[clap(long)]
    pub api_host: Option<String>,

    /// Credential helper entry for the secret
    #[clap(long, default_value = "proxmox/ansible")]
    pub secret_ref: String,

    /// Credential helper named in the printed hint (defaults to the configuration's)
    #[clap(long)]
    pub helper: Option<String>,

    /// Prompt for a login password for the user (set on creation, reset if it exists)
    #[clap(long)]
    pub password: bool,
}

impl TokenArgs {
    pub fn request(&self) -> TokenRequest {
        TokenRequest {
            user: self.user.clone(),
            token_name: self.token_name.clone(),
            privsep: !self.no_privsep,
            role: self.role.clone(),
            acl_paths: self.acl_paths.clone(),
            ..TokenRequest::default()
        }
    }

    fn transport(&self) -> Box<dyn CommandTransport> {
        match &self.host {
            Some(host) if !self.local => Box::new(
                SshTransport::new(host)
                    .with_user(&self.ssh_user)
                    .with_port(self.port)
                    .with_identity(self.identity.clone()),
            ),
            _ => Box::new(LocalTransport),
        }
    }
}

/// Credential helper for the hint: the flag, then the configuration, then the default
///
/// The configuration is read leniently; it is often still a template when a
/// token is created.
pub fn credential_helper(layout: &ProjectLayout, flag: Option<&str>) -> String {
    if let Some(helper) = flag {
        return helper.to_string();
    }
    std::fs::read_to_string(&layout.config)
        .ok()
        .and_then(|raw| serde_yaml::from_str::<serde_yaml::Value>(&raw).ok())
        .and_then(|doc| doc.get("credentials")?.get("helper")?.as_str().map(str::to_string))
        .unwrap_or_else(|| CredentialSettings::default().helper)
}

/// Read the user's password twice without echo
fn prompt_password(user: &str) -> Result<Secret> {
    for _ in 0..PASSWORD_ATTEMPTS {
        let password = rpassword::prompt_password(format!("Password for {}: ", user))
            .map_err(|e| prompt_error(&e))?;
        let confirmation =
            rpassword::prompt_password("Confirm password: ").map_err(|e| prompt_error(&e))?;

        match check_password(&password, &confirmation) {
            Ok(()) => return Ok(Secret::new(password)),
            Err(ProxError::TokenBootstrapFailed { reason, .. }) => {
                eprintln!("  {} {}", "✗".red(), reason);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ProxError::TokenBootstrapFailed {
        reason: format!("no valid password after {} attempts", PASSWORD_ATTEMPTS),
        help: Some("Run again without --password to leave the user's password unset".into()),
    }
    .into())
}

fn prompt_error(e: &std::io::Error) -> ProxError {
    ProxError::TokenBootstrapFailed {
        reason: format!("cannot read the password: {}", e),
        help: Some("--password needs an interactive terminal".into()),
    }
}

/// Run the token command
pub async fn run(layout: &ProjectLayout, args: TokenArgs, _verbose: bool) -> Result<()> {
    if args.local {
        check_tool("pveum")?;
    } else {
        check_tool("ssh")?;
    }

    let transport = args.transport();
    let mut request = args.request();
    if args.password {
        request.password = Some(prompt_password(&request.user)?);
    }

    println!(
        "{} {} on {}",
        "Creating API token".bold(),
        request.token_id().cyan(),
        transport.describe()
    );
    println!();

    let outcome = TokenBootstrap::new(transport.as_ref()).run(&request).await?;

    if outcome.user_created {
        println!("  {} Created user {}", "✓".green(), request.user);
    } else {
        println!("  {} User {} already exists", "○".dimmed(), request.user);
    }
    if outcome.password_reset {
        println!("  {} Reset the password of {}", "✓".green(), request.user);
    }
    println!("  {} Created token {}", "✓".green(), outcome.token.token_id);
    for path in &request.acl_paths {
        println!("  {} Granted {} on {}", "✓".green(), request.role, path);
    }

    println!();
    println!("{}", "Token secret (shown only once):".yellow().bold());
    println!("  {}", outcome.token.secret.expose());
    println!();
    println!("Store it in the credential helper:");
    println!(
        "  {}",
        format!(
            "{} insert {}",
            credential_helper(layout, args.helper.as_deref()),
            args.secret_ref
        )
        .cyan()
    );
    println!();

    let api_host = args
        .api_host
        .clone()
        .or_else(|| args.host.clone())
        .unwrap_or_else(|| "localhost".to_string());

    println!("Configuration block:");
    println!("{}", "─".repeat(50).dimmed());
    print!("{}", config_snippet(&api_host, &request, &args.secret_ref));
    println!("{}", "─".repeat(50).dimmed());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_token_args_defaults() {
        let cli = Cli::parse_from(["proxk3s", "token", "--host", "pve1"]);
        let Commands::Token(args) = cli.command else {
            panic!("expected token command");
        };

        let request = args.request();
        assert_eq!(request.token_id(), "ansible@pve!ansible");
        assert!(request.privsep);
        assert_eq!(request.acl_paths, vec!["/"]);
        assert_eq!(args.ssh_user, "root");
        assert!(!args.password);
        assert!(request.password.is_none());
    }

    #[test]
    fn test_credential_helper_from_configuration() {
        let dir = TempDir::new().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert_eq!(credential_helper(&layout, None), "pass");

        std::fs::create_dir_all(layout.config.parent().unwrap()).unwrap();
        std::fs::write(&layout.config, "credentials:\n  helper: gopass\nnodes: []\n").unwrap();
        assert_eq!(credential_helper(&layout, None), "gopass");
        assert_eq!(credential_helper(&layout, Some("secret-tool")), "secret-tool");

        std::fs::write(&layout.config, "cluster: [unclosed\n").unwrap();
        assert_eq!(credential_helper(&layout, None), "pass");
    }

    #[test]
    fn test_token_requires_host_or_local() {
        assert!(Cli::try_parse_from(["proxk3s", "token"]).is_err());
        assert!(Cli::try_parse_from(["proxk3s", "token", "--local"]).is_ok());
        assert!(Cli::try_parse_from(["proxk3s", "token", "--local", "--host", "x"]).is_err());
    }
}
