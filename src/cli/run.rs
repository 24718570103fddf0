// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Run command - execute pipeline stages

use colored::Colorize;
use miette::Result;
use std::sync::Arc;
use tokio::sync::watch;

use super::load_config;
use crate::errors::{ProxError, ProxResult};
use crate::layout::ProjectLayout;
use crate::pipeline::{ExecutionOptions, PipelineExecutor, RunContext, StageDescriptor, StageRegistry};
use crate::runners::create_default_runners;
use crate::setup::{
    ensure_credential_helper, resolve_token_secret, select_strategy, ShowCommandHelper,
    RUNTIME_TOOL, TOKEN_SECRET_ENV,
};
use crate::state::FilesystemCheckpoints;

/// Run the selected stages
pub async fn run(
    layout: &ProjectLayout,
    stages: Vec<String>,
    from: Option<String>,
    to: Option<String>,
    dry_run: bool,
    verbose: bool,
) -> Result<()> {
    let registry = StageRegistry::standard();

    let options = ExecutionOptions {
        stages: stages
            .iter()
            .map(|s| registry.resolve(s))
            .collect::<ProxResult<_>>()?,
        from: from.as_deref().map(|s| registry.resolve(s)).transpose()?,
        to: to.as_deref().map(|s| registry.resolve(s)).transpose()?,
        dry_run,
        verbose,
    };

    let loaded = load_config(layout, verbose)?;
    let mut ctx = RunContext::new(loaded, layout.clone())?;

    let mut executor =
        PipelineExecutor::new(Arc::new(FilesystemCheckpoints::new(layout.state_dir.clone())));
    for (name, runner) in create_default_runners() {
        executor.register_runner(&name, runner);
    }

    if !dry_run {
        let selected = registry.select(&options.selection())?;
        preflight(&executor, &selected).await?;

        if selected.iter().any(|s| s.requires_credentials) {
            let secret = read_secret(&ctx).await?;
            ctx = ctx.with_secret(secret);
        }
    }

    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("{}", "Interrupt received, stopping the running stage...".yellow());
            let _ = abort_tx.send(true);
        }
    });
    let executor = executor.with_abort(abort_rx);

    match executor.execute(&registry, &ctx, &options).await {
        Ok(report) => {
            if verbose && !dry_run {
                for outcome in report.outcomes.iter().filter(|o| o.note.is_some()) {
                    println!(
                        "  {} {}: {}",
                        "○".dimmed(),
                        outcome.stage,
                        outcome.note.as_deref().unwrap_or_default()
                    );
                }
            }
            Ok(())
        }
        Err(ProxError::StageExecutionFailed {
            stage,
            name,
            exit_code,
            output,
            help,
        }) => {
            if !output.trim().is_empty() {
                eprintln!();
                eprintln!("{}", format!("Output of stage {} ({}):", stage, name).red().bold());
                eprintln!("{}", output.trim_end().dimmed());
            }
            Err(ProxError::StageExecutionFailed {
                stage,
                name,
                exit_code,
                output,
                help,
            }
            .into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Tools and the credential helper must be present before any stage starts
async fn preflight(executor: &PipelineExecutor, selected: &[&StageDescriptor]) -> ProxResult<()> {
    let missing = executor.check_tools(selected).await;
    if missing.iter().any(|name| name == "ansible") {
        return Err(ProxError::tool_not_found(RUNTIME_TOOL));
    }
    if let Some(name) = missing.first() {
        return Err(ProxError::RunnerNotFound {
            runner: name.clone(),
        });
    }

    Ok(())
}

/// Token secret from the environment override or the credential helper
async fn read_secret(ctx: &RunContext) -> ProxResult<crate::setup::Secret> {
    let env_override = std::env::var(TOKEN_SECRET_ENV).ok();
    let helper = ShowCommandHelper::new(&ctx.config().credentials.helper);

    if env_override.as_deref().map_or(true, |v| v.trim().is_empty()) {
        ensure_credential_helper(&helper, select_strategy().as_ref(), false).await?;
    }

    resolve_token_secret(&helper, &ctx.config().proxmox.api_token_secret_ref, env_override).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageSelection;

    #[test]
    fn test_every_standard_stage_has_a_runner() {
        let registry = StageRegistry::standard();
        let runners = create_default_runners();
        let selected = registry.select(&StageSelection::default()).unwrap();
        assert!(selected
            .iter()
            .all(|s| runners.contains_key(s.task.runner_name())));
    }

    #[tokio::test]
    async fn test_preflight_reports_missing_runner() {
        let registry = StageRegistry::standard();
        let executor =
            PipelineExecutor::new(Arc::new(FilesystemCheckpoints::new(std::env::temp_dir())));
        let selected = registry.select(&StageSelection::default()).unwrap();

        let err = preflight(&executor, &selected).await.unwrap_err();
        assert!(matches!(err, ProxError::ToolNotFound { ref tool, .. } if tool == RUNTIME_TOOL));
    }
}
