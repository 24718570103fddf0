// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Pipeline executor
//!
//! Walks the selected stages strictly in sequence, enforcing preconditions and
//! run-once contracts, and records a checkpoint around every attempt.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::errors::{ProxError, ProxResult, RecoverySuggestion};
use crate::inventory::InventoryDocument;
use crate::pipeline::{
    Precondition, RunContext, StageDescriptor, StageGraph, StageId, StageRegistry, StageRun,
    StageSelection, StageStatus,
};
use crate::runners::{ExecutionResult, StageRunner};
use crate::state::{Checkpoint, CheckpointStatus, CheckpointStore};
use crate::utils::create_spinner;

/// Pipeline execution options
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Only run these stages (each is an explicit invocation)
    pub stages: Vec<StageId>,
    /// Start the sequence at this stage
    pub from: Option<StageId>,
    /// Stop the sequence after this stage
    pub to: Option<StageId>,
    /// Only show what would be done
    pub dry_run: bool,
    /// Print runner output
    pub verbose: bool,
}

impl ExecutionOptions {
    pub fn selection(&self) -> StageSelection {
        StageSelection {
            stages: self.stages.clone(),
            from: self.from,
            to: self.to,
        }
    }
}

/// What happened to one stage
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: StageId,
    pub name: String,
    pub status: StageStatus,
    /// Reason for a skip, or the dry-run assessment
    pub note: Option<String>,
    pub duration: Option<Duration>,
}

/// Result of executing a pipeline
#[derive(Debug)]
pub struct PipelineReport {
    /// Outcome of every stage reached, in order
    pub outcomes: Vec<StageOutcome>,
    /// Total execution time
    pub duration: Duration,
}

impl PipelineReport {
    pub fn outcome(&self, stage: StageId) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Pipeline executor
pub struct PipelineExecutor {
    /// Registered runners by name
    runners: HashMap<String, Box<dyn StageRunner>>,
    /// Checkpoint storage
    checkpoints: Arc<dyn CheckpointStore>,
    /// Flips to `true` when the run must stop
    abort: Option<watch::Receiver<bool>>,
}

impl PipelineExecutor {
    /// Create a new pipeline executor
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            runners: HashMap::new(),
            checkpoints,
            abort: None,
        }
    }

    /// Register a runner
    pub fn register_runner(&mut self, name: &str, runner: Box<dyn StageRunner>) {
        self.runners.insert(name.to_string(), runner);
    }

    /// Stop the run when the receiver sees `true`
    pub fn with_abort(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Execute the selected stages
    pub async fn execute(
        &self,
        registry: &StageRegistry,
        ctx: &RunContext,
        options: &ExecutionOptions,
    ) -> ProxResult<PipelineReport> {
        let start = Instant::now();
        let selection = options.selection();
        let stages = registry.select(&selection)?;
        let graph = StageGraph::build(registry.stages())?;

        self.print_execution_plan(ctx, &stages, &graph);

        if options.dry_run {
            let outcomes = self.assess(registry, ctx, &stages, selection.is_explicit()).await?;
            return Ok(PipelineReport {
                outcomes,
                duration: start.elapsed(),
            });
        }

        let mut outcomes = Vec::new();
        let mut runs: Vec<StageRun> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let status = if i == 0 { StageStatus::Pending } else { StageStatus::Blocked };
                StageRun::new(s.id, status)
            })
            .collect();

        for (stage, run) in stages.iter().copied().zip(runs.iter_mut()) {
            if let Some(reason) = self.skip_reason(stage, ctx, selection.is_explicit()).await? {
                run.advance(StageStatus::Skipped)?;
                println!(
                    "  {} {} {} {}",
                    "○".dimmed(),
                    stage.id.to_string().dimmed(),
                    stage.name.dimmed(),
                    format!("({})", reason).dimmed()
                );
                info!(stage = %stage.id, "skipped: {}", reason);
                outcomes.push(outcome(stage, StageStatus::Skipped, Some(reason), None));
                continue;
            }

            if let Some(pre) = self.unmet_precondition(registry, stage, ctx, &HashSet::new()).await? {
                println!("  {} {} {}", "✗".red(), stage.id, stage.name.bold());
                return Err(precondition_error(registry, stage, pre));
            }

            if self.is_aborted() {
                return Err(ProxError::Aborted { stage: stage.id });
            }

            let runner = self.runner_for(stage)?;
            runner.validate_stage(stage, ctx)?;

            if run.status() == StageStatus::Blocked {
                run.advance(StageStatus::Pending)?;
            }
            run.advance(StageStatus::Running)?;

            let result = match self.run_stage(runner, stage, ctx).await {
                Ok(result) => result,
                Err(e) => {
                    run.advance(StageStatus::Failed)?;
                    return Err(e);
                }
            };

            run.advance(StageStatus::Succeeded)?;
            println!(
                "  {} {} {} ({:.2}s)",
                "✓".green(),
                stage.id,
                stage.name.bold(),
                result.duration.as_secs_f64()
            );
            if options.verbose && !result.stdout.trim().is_empty() {
                println!("{}", result.stdout.trim_end().dimmed());
            }

            outcomes.push(outcome(stage, StageStatus::Succeeded, None, Some(result.duration)));
        }

        let duration = start.elapsed();
        println!();
        println!(
            "{}",
            format!("Pipeline completed successfully in {:.2}s", duration.as_secs_f64()).green()
        );

        Ok(PipelineReport { outcomes, duration })
    }

    /// Run one stage between an `in_progress` and a final checkpoint
    async fn run_stage(
        &self,
        runner: &dyn StageRunner,
        stage: &StageDescriptor,
        ctx: &RunContext,
    ) -> ProxResult<ExecutionResult> {
        let digest = ctx.digest();
        self.checkpoints
            .record(&Checkpoint::new(stage.id, CheckpointStatus::InProgress, digest))
            .await?;

        let spinner = create_spinner(&format!("{} {}", stage.id, stage.name));
        let attempt = match self.run_until_aborted(runner, stage, ctx).await {
            // a runner killed by the same interrupt reports a failure
            Some(Err(_)) if self.is_aborted() => None,
            Some(Ok(result)) if !result.success && self.is_aborted() => None,
            attempt => attempt,
        };
        spinner.finish_and_clear();

        match attempt {
            None => {
                self.checkpoints
                    .record(
                        &Checkpoint::new(stage.id, CheckpointStatus::Aborted, digest)
                            .with_message("aborted by operator"),
                    )
                    .await?;
                println!("  {} {} {} (aborted)", "✗".red(), stage.id, stage.name.bold());
                warn!(stage = %stage.id, "stage aborted");
                Err(ProxError::Aborted { stage: stage.id })
            }
            Some(Err(e)) => {
                self.checkpoints
                    .record(
                        &Checkpoint::new(stage.id, CheckpointStatus::Failed, digest)
                            .with_message(e.to_string()),
                    )
                    .await?;
                println!("  {} {} {}", "✗".red(), stage.id, stage.name.bold());
                Err(e)
            }
            Some(Ok(result)) if !result.success => {
                self.checkpoints
                    .record(
                        &Checkpoint::new(stage.id, CheckpointStatus::Failed, digest)
                            .with_exit_code(result.exit_code),
                    )
                    .await?;
                println!(
                    "  {} {} {} failed (exit code {})",
                    "✗".red(),
                    stage.id,
                    stage.name.bold(),
                    result.exit_code
                );
                Err(ProxError::stage_failed(
                    stage.id,
                    &stage.name,
                    result.exit_code,
                    &result.combined_output(),
                ))
            }
            Some(Ok(result)) => {
                self.checkpoints
                    .record(
                        &Checkpoint::new(stage.id, CheckpointStatus::Completed, digest)
                            .with_exit_code(result.exit_code),
                    )
                    .await?;
                Ok(result)
            }
        }
    }

    /// `None` when the abort signal fired first; the runner's future is dropped
    async fn run_until_aborted(
        &self,
        runner: &dyn StageRunner,
        stage: &StageDescriptor,
        ctx: &RunContext,
    ) -> Option<ProxResult<ExecutionResult>> {
        let work = runner.run(stage, ctx);
        match self.abort.clone() {
            Some(mut abort) => tokio::select! {
                biased;
                _ = wait_for_abort(&mut abort) => None,
                result = work => Some(result),
            },
            None => Some(work.await),
        }
    }

    fn is_aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn runner_for(&self, stage: &StageDescriptor) -> ProxResult<&dyn StageRunner> {
        let name = stage.task.runner_name();
        self.runners
            .get(name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProxError::RunnerNotFound {
                runner: name.to_string(),
            })
    }

    /// Why a stage does not run at all, if it doesn't
    ///
    /// Errors for run-once stages that must not be touched.
    async fn skip_reason(
        &self,
        stage: &StageDescriptor,
        ctx: &RunContext,
        explicit: bool,
    ) -> ProxResult<Option<String>> {
        if stage.is_run_once() {
            if let Some(checkpoint) = self.checkpoints.get(stage.id).await? {
                match checkpoint.status {
                    CheckpointStatus::Completed if explicit => {
                        return Err(ProxError::AlreadyCompleted {
                            stage: stage.id,
                            name: stage.name.clone(),
                        });
                    }
                    CheckpointStatus::Completed => {
                        if checkpoint.config_digest != ctx.digest() {
                            warn!(
                                stage = %stage.id,
                                "configuration changed since {} completed; run-once stages are not re-applied",
                                stage.name
                            );
                        }
                        return Ok(Some("already completed".to_string()));
                    }
                    CheckpointStatus::InProgress => {
                        return Err(ProxError::StageInterrupted {
                            stage: stage.id,
                            name: stage.name.clone(),
                        });
                    }
                    CheckpointStatus::Failed | CheckpointStatus::Aborted => {}
                }
            }
        }

        if let Some(role) = stage.requires_group {
            if ctx.inventory().role_size(role) == 0 {
                return Ok(Some(format!("no hosts in group '{}'", role.group_name())));
            }
        }

        Ok(None)
    }

    /// First precondition that does not hold
    ///
    /// Stages in `planned` count as completed (dry runs).
    async fn unmet_precondition<'a>(
        &self,
        registry: &StageRegistry,
        stage: &'a StageDescriptor,
        ctx: &RunContext,
        planned: &HashSet<StageId>,
    ) -> ProxResult<Option<&'a Precondition>> {
        for pre in &stage.preconditions {
            let holds = match pre {
                Precondition::InventoryArtifact => {
                    let producer_planned = registry
                        .inventory_stage()
                        .is_some_and(|p| planned.contains(&p.id));
                    producer_planned || self.inventory_artifact_present(ctx)?
                }
                Precondition::StageCompleted(id) => {
                    planned.contains(id) || self.checkpoints.is_completed(*id).await?
                }
            };
            if !holds {
                return Ok(Some(pre));
            }
        }
        Ok(None)
    }

    fn inventory_artifact_present(&self, ctx: &RunContext) -> ProxResult<bool> {
        Ok(match artifact_state(ctx) {
            ArtifactState::Current => true,
            ArtifactState::Stale => {
                warn!(
                    path = %ctx.layout().inventory.display(),
                    "inventory artifact does not match the configuration; re-run stage 0100"
                );
                true
            }
            ArtifactState::Unreadable(reason) => {
                warn!(path = %ctx.layout().inventory.display(), "inventory artifact unreadable: {}", reason);
                false
            }
            ArtifactState::Missing => false,
        })
    }

    /// What a run would do, without running anything
    async fn assess(
        &self,
        registry: &StageRegistry,
        ctx: &RunContext,
        stages: &[&StageDescriptor],
        explicit: bool,
    ) -> ProxResult<Vec<StageOutcome>> {
        let mut planned = HashSet::new();
        let mut outcomes = Vec::new();
        let mut blocked = false;

        for stage in stages.iter().copied() {
            let (status, note) = if blocked {
                (StageStatus::Blocked, "after an earlier blocked stage".to_string())
            } else {
                match self.skip_reason(stage, ctx, explicit).await {
                    Err(e) => {
                        blocked = true;
                        (StageStatus::Blocked, e.to_string())
                    }
                    Ok(Some(reason)) => (StageStatus::Skipped, reason),
                    Ok(None) => match self.unmet_precondition(registry, stage, ctx, &planned).await? {
                        Some(pre) => {
                            blocked = true;
                            (StageStatus::Blocked, format!("waiting on: {}", pre))
                        }
                        None => {
                            planned.insert(stage.id);
                            (StageStatus::Pending, "would run".to_string())
                        }
                    },
                }
            };

            let glyph = match status {
                StageStatus::Pending => "→".blue(),
                StageStatus::Skipped => "○".dimmed(),
                _ => "✗".red(),
            };
            println!("  {} {} {} {}", glyph, stage.id, stage.name, format!("({})", note).dimmed());

            outcomes.push(outcome(stage, status, Some(note), None));
        }

        println!();
        println!("{}", "Dry run: nothing was executed".yellow());
        Ok(outcomes)
    }

    /// Print the execution plan
    fn print_execution_plan(&self, ctx: &RunContext, stages: &[&StageDescriptor], graph: &StageGraph) {
        println!();
        println!("{}: {}", "Cluster".bold(), ctx.config().cluster.name);
        println!("{}", "═".repeat(50));
        println!(
            "Execution plan ({} stage{}):",
            stages.len(),
            if stages.len() == 1 { "" } else { "s" }
        );
        println!();

        for stage in stages {
            let deps = graph.dependencies(stage.id);

            print!(
                "  {} {} ({}, {})",
                stage.id,
                stage.name.bold(),
                stage.task.runner_name(),
                stage.idempotency
            );
            if !deps.is_empty() {
                let deps: Vec<String> = deps.iter().map(StageId::to_string).collect();
                print!(" {}", format!("[after: {}]", deps.join(", ")).dimmed());
            }
            println!();
        }

        let reads_artifact = stages
            .iter()
            .any(|s| s.preconditions.contains(&Precondition::InventoryArtifact));
        let writes_artifact = stages.iter().any(|s| s.task.runner_name() == "inventory");
        if reads_artifact && !writes_artifact {
            match artifact_state(ctx) {
                ArtifactState::Stale => {
                    println!();
                    println!(
                        "  {} {} does not match the configuration; run stage 0100 to regenerate it",
                        "⚠".yellow(),
                        ctx.layout().inventory.display()
                    );
                }
                ArtifactState::Unreadable(reason) => {
                    println!();
                    println!(
                        "  {} {} is not a usable inventory: {}",
                        "✗".red(),
                        ctx.layout().inventory.display(),
                        reason
                    );
                }
                ArtifactState::Current | ArtifactState::Missing => {}
            }
        }

        println!();
    }

    /// Runners missing for the given stages, by name
    pub async fn check_tools(&self, stages: &[&StageDescriptor]) -> Vec<String> {
        let mut missing = Vec::new();
        let names: HashSet<&str> = stages.iter().map(|s| s.task.runner_name()).collect();

        for name in names {
            let available = match self.runners.get(name) {
                Some(runner) => runner.check_available().await.unwrap_or(false),
                None => false,
            };
            if !available {
                missing.push(name.to_string());
            }
        }

        missing.sort();
        missing
    }
}

/// How the inventory artifact on disk relates to the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArtifactState {
    Missing,
    Unreadable(String),
    Stale,
    Current,
}

fn artifact_state(ctx: &RunContext) -> ArtifactState {
    let Ok(on_disk) = std::fs::read_to_string(&ctx.layout().inventory) else {
        return ArtifactState::Missing;
    };
    if on_disk.trim().is_empty() {
        return ArtifactState::Missing;
    }

    match InventoryDocument::from_yaml(&on_disk) {
        Err(e) => ArtifactState::Unreadable(e.to_string()),
        Ok(doc) if doc == InventoryDocument::from_inventory(ctx.inventory()) => ArtifactState::Current,
        Ok(_) => ArtifactState::Stale,
    }
}

fn outcome(
    stage: &StageDescriptor,
    status: StageStatus,
    note: Option<String>,
    duration: Option<Duration>,
) -> StageOutcome {
    StageOutcome {
        stage: stage.id,
        name: stage.name.clone(),
        status,
        note,
        duration,
    }
}

fn precondition_error(
    registry: &StageRegistry,
    stage: &StageDescriptor,
    pre: &Precondition,
) -> ProxError {
    let help = match pre {
        Precondition::StageCompleted(id) => format!("Run 'proxk3s run --stage {}' first", id),
        Precondition::InventoryArtifact => match registry.inventory_stage() {
            Some(producer) => format!("Run 'proxk3s run --stage {}' first", producer.id),
            None => RecoverySuggestion::run_prerequisite(stage.id).to_string(),
        },
    };

    ProxError::PreconditionUnmet {
        stage: stage.id,
        precondition: pre.to_string(),
        help: Some(help),
    }
}

async fn wait_for_abort(abort: &mut watch::Receiver<bool>) {
    loop {
        if *abort.borrow_and_update() {
            return;
        }
        if abort.changed().await.is_err() {
            // Sender gone without aborting
            std::future::pending::<()>().await;
        }
    }
}
