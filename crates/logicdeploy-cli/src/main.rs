//! logicdeploy - deployment pipeline CLI for control-logic releases
//!
//! ## Commands
//!
//! - `extract`: Print the facts extracted from a directory of logic exports
//! - `check`: Run the safety checks and print the gate verdict
//! - `plan`: Print the chunk levels the chunked strategy would apply
//! - `simulate`: Run a full rollout against in-memory targets
//! - `status`: Show a recorded deployment

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use logicdeploy_core::metrics::METRICS;
use logicdeploy_core::obs::DeploymentSpan;
use logicdeploy_core::{
    plan_chunks, ApprovalDecision, Approver, Collaborators, Deployment, DeploymentService,
    DeploymentStatus, LogLevel, PipelineConfig, StartRequest, StrategyKind,
};
use logicdeploy_safety::{
    extract, load_dir, CheckContext, CheckStatus, CheckUpdate, GateVerdict, SafetyGate,
    SafetyPipeline, SafetyRun, TargetProfile,
};
use logicdeploy_state::fakes::{
    MemoryPipelineStore, MemoryTagDatabase, MemoryTargetRuntime, MemoryVersioningCenter,
    RuntimeFault,
};
use logicdeploy_state::{
    CriticalTag, MaintenanceWindow, PipelineStore, RecordKind, ReleaseMetadata, ReleaseRecord,
    ReleaseStage, RemoteState, RuntimeLock, Snapshot, SurrealPipelineStore,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, Level};

const LOCAL_RELEASE: &str = "local";
const LOCAL_PROJECT: &str = "local";

#[derive(Parser)]
#[command(name = "logicdeploy")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Safety-gated deployment of industrial control logic", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (TOML)
    #[arg(long, global = true, env = "LOGICDEPLOY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print extracted facts for a directory of logic files as JSON
    Extract {
        /// Directory of vendor exports
        dir: PathBuf,
    },

    /// Run the safety checks against a directory of logic files
    Check {
        /// Directory of vendor exports
        dir: PathBuf,

        /// JSON file with the project's critical tags
        #[arg(long)]
        critical_tags: Option<PathBuf>,

        /// Target runtimes to check against (comma separated)
        #[arg(long, value_delimiter = ',')]
        targets: Vec<String>,
    },

    /// Print the chunk levels for a chunked rollout
    Plan {
        /// Directory of vendor exports
        dir: PathBuf,
    },

    /// Run a complete rollout against simulated targets
    Simulate {
        /// Directory of vendor exports
        dir: PathBuf,

        /// atomic, canary, chunked or maintenance_window
        #[arg(short, long, default_value = "atomic")]
        strategy: StrategyKind,

        /// Simulated target runtimes (comma separated)
        #[arg(long, value_delimiter = ',', default_value = "plc-1,plc-2")]
        targets: Vec<String>,

        /// JSON file with the project's critical tags
        #[arg(long)]
        critical_tags: Option<PathBuf>,

        /// Make activation fail on this target to exercise rollback
        #[arg(long)]
        fail_target: Option<String>,
    },

    /// Show a recorded deployment
    Status {
        /// Deployment ID
        deployment_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    logicdeploy_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    let outcome = run_command(cli.command, config).await;
    METRICS.flush();

    if !outcome? {
        std::process::exit(2);
    }
    Ok(())
}

/// Run one command. `Ok(false)` means the checks blocked the release.
async fn run_command(command: Commands, config: PipelineConfig) -> Result<bool> {
    match command {
        Commands::Extract { dir } => cmd_extract(&dir).map(|_| true),
        Commands::Check {
            dir,
            critical_tags,
            targets,
        } => cmd_check(&dir, critical_tags.as_deref(), &targets, &config).await,
        Commands::Plan { dir } => cmd_plan(&dir).map(|_| true),
        Commands::Simulate {
            dir,
            strategy,
            targets,
            critical_tags,
            fail_target,
        } => {
            let options = SimulateOptions {
                strategy,
                targets,
                critical_tags: match critical_tags {
                    Some(path) => load_critical_tags(&path)?,
                    None => Vec::new(),
                },
                fail_target,
            };
            cmd_simulate(&dir, options, config).await.map(|_| true)
        }
        Commands::Status { deployment_id } => cmd_status(&deployment_id).await.map(|_| true),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Critical tags as a JSON array of `{name, address, description}`.
fn load_critical_tags(path: &Path) -> Result<Vec<CriticalTag>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid critical tag file {}", path.display()))
}

fn load_snapshot(dir: &Path) -> Result<Snapshot> {
    load_dir(dir, "local-snapshot", "local-version")
        .with_context(|| format!("Failed to load logic files from {}", dir.display()))
}

/// A release record for logic loaded straight from disk.
fn local_release(snapshot: &Snapshot, targets: &[String]) -> ReleaseRecord {
    ReleaseRecord {
        release_id: LOCAL_RELEASE.to_string(),
        project_id: LOCAL_PROJECT.to_string(),
        version_id: snapshot.version_id.clone(),
        snapshot_id: snapshot.snapshot_id.clone(),
        stage: ReleaseStage::Candidate,
        created_by: "cli".to_string(),
        created_at: Utc::now(),
        metadata: ReleaseMetadata {
            target_runtimes: targets.to_vec(),
            priority: 0,
        },
    }
}

// ---------------------------------------------------------------------------
// extract / plan
// ---------------------------------------------------------------------------

fn cmd_extract(dir: &Path) -> Result<()> {
    let facts = extract(&load_snapshot(dir)?);
    println!("{}", serde_json::to_string_pretty(&facts)?);
    Ok(())
}

fn render_plan(levels: &[Vec<String>]) -> String {
    let mut out = String::new();
    for (i, level) in levels.iter().enumerate() {
        out.push_str(&format!("level {}: {}\n", i, level.join(", ")));
    }
    out
}

fn cmd_plan(dir: &Path) -> Result<()> {
    let facts = extract(&load_snapshot(dir)?);
    let plan = plan_chunks(&facts)?;
    print!("{}", render_plan(&plan.levels));
    println!(
        "{} chunk(s) in {} level(s)",
        plan.chunk_count(),
        plan.levels.len()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CheckReport {
    run: SafetyRun,
    verdict: GateVerdict,
}

fn status_label(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pending => "PENDING",
        CheckStatus::Running => "RUNNING",
        CheckStatus::Passed => "PASS",
        CheckStatus::Failed => "FAIL",
        CheckStatus::Warning => "WARN",
    }
}

async fn run_checks(
    snapshot: &Snapshot,
    critical_tags: Vec<CriticalTag>,
    targets: &[String],
    config: &PipelineConfig,
    updates: Option<&mpsc::Sender<CheckUpdate>>,
) -> SafetyRun {
    let facts = extract(snapshot);
    let profiles = targets
        .iter()
        .map(|t| TargetProfile {
            supported_dialects: config.runtime.supported_dialects.clone(),
            ..TargetProfile::open(t.clone())
        })
        .collect();
    let ctx = CheckContext::new(local_release(snapshot, targets), Utc::now())
        .with_critical_tags(critical_tags)
        .with_targets(profiles)
        .with_limits(config.limits)
        .with_deployer(config.runtime.deployer.clone());
    SafetyPipeline::standard()
        .run(LOCAL_RELEASE, &facts, &ctx, updates)
        .await
}

/// Returns whether the gate passed.
async fn cmd_check(
    dir: &Path,
    critical_tags: Option<&Path>,
    targets: &[String],
    config: &PipelineConfig,
) -> Result<bool> {
    let snapshot = load_snapshot(dir)?;
    let tags = match critical_tags {
        Some(path) => load_critical_tags(path)?,
        None => Vec::new(),
    };

    let (tx, mut rx) = mpsc::channel::<CheckUpdate>(64);
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if update.check.status.is_terminal() {
                eprintln!(
                    "[{:>4}] {}: {}",
                    status_label(update.check.status),
                    update.check.name,
                    update.check.message
                );
            }
        }
    });
    let run = run_checks(&snapshot, tags, targets, config, Some(&tx)).await;
    drop(tx);
    printer.await.context("check progress printer panicked")?;

    let verdict = SafetyGate::evaluate(&run.checks);
    let passed = verdict.passed;
    println!(
        "{}",
        serde_json::to_string_pretty(&CheckReport { run, verdict })?
    );
    Ok(passed)
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

struct SimulateOptions {
    strategy: StrategyKind,
    targets: Vec<String>,
    critical_tags: Vec<CriticalTag>,
    fail_target: Option<String>,
}

/// Approver for a slot: its named role, else the first role allowed to fill it.
fn simulated_approver(position: usize, role: Option<&str>, eligible: &[String]) -> Approver {
    let role = role
        .map(str::to_string)
        .or_else(|| eligible.first().cloned())
        .unwrap_or_else(|| "operator".to_string());
    Approver::new(format!("sim-approver-{position}"), role)
}

/// Drive a rollout of `dir` end to end against in-memory targets.
async fn simulate(dir: &Path, options: SimulateOptions, config: PipelineConfig) -> Result<Deployment> {
    let snapshot = load_snapshot(dir)?;

    let versioning = Arc::new(MemoryVersioningCenter::new());
    versioning.insert_release(local_release(&snapshot, &options.targets));
    versioning.insert_snapshot(snapshot);

    let tags = Arc::new(MemoryTagDatabase::new());
    tags.set_tags(LOCAL_PROJECT, options.critical_tags);

    let runtime = Arc::new(MemoryTargetRuntime::new());
    let now = Utc::now();
    for target in &options.targets {
        runtime.add_target(
            target,
            RemoteState {
                running: true,
                ..RemoteState::default()
            },
        );
        if options.strategy == StrategyKind::MaintenanceWindow {
            runtime.set_lock(
                target,
                RuntimeLock {
                    holder: None,
                    windows: vec![MaintenanceWindow {
                        starts_at: now - Duration::minutes(1),
                        ends_at: now + Duration::hours(1),
                        approved: true,
                    }],
                },
            );
        }
    }
    if let Some(target) = &options.fail_target {
        runtime.script_fault(target, "activate", RuntimeFault::Reject("simulated fault".into()));
    }

    let service = DeploymentService::new(
        Collaborators {
            versioning,
            tags,
            runtime,
            store: Arc::new(MemoryPipelineStore::new()),
        },
        config,
    );

    let dep = service
        .start_deployment(StartRequest::new(LOCAL_RELEASE, options.strategy, "cli"))
        .await?;
    let staged = match service.advance_deployment(&dep.id).await {
        Ok(staged) => staged,
        Err(e) => {
            print_deployment(&service.get_deployment(&dep.id)?);
            return Err(e.into());
        }
    };

    if staged.status == DeploymentStatus::Staging {
        let round = service
            .approvals()
            .round(LOCAL_RELEASE)
            .context("no approval round opened")?;
        for slot in &round.slots {
            let approver =
                simulated_approver(slot.position, slot.approver_role.as_deref(), &slot.eligible_roles);
            service
                .submit_approval(
                    &slot.id,
                    &approver,
                    ApprovalDecision::Approve,
                    Some("simulated".into()),
                )
                .await?;
        }
        // the last approval moves the deployment to ready
    }

    // ready -> deploying -> settled; a failed rollout is still reported below
    if let Err(e) = service.advance_deployment(&dep.id).await {
        info!(error = %e, "simulated rollout failed");
    }
    Ok(service.get_deployment(&dep.id)?)
}

async fn cmd_simulate(dir: &Path, options: SimulateOptions, config: PipelineConfig) -> Result<()> {
    let deployment = simulate(dir, options, config).await?;
    print_deployment(&deployment);
    if deployment.status != DeploymentStatus::Completed {
        anyhow::bail!("Simulated deployment ended {}", deployment.status);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

async fn cmd_status(deployment_id: &str) -> Result<()> {
    let store = SurrealPipelineStore::from_env()
        .await
        .context("Failed to connect to logicdeploy database")?;
    let record = store
        .get(RecordKind::Deployment, deployment_id)
        .await?
        .with_context(|| format!("Deployment not found: {deployment_id}"))?;
    let deployment: Deployment = record.decode()?;
    print_deployment(&deployment);
    Ok(())
}

fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "INFO",
        LogLevel::Warn => "WARN",
        LogLevel::Error => "ERROR",
    }
}

fn render_deployment(deployment: &Deployment) -> String {
    let mut out = format!(
        "deployment {}\nrelease:  {}\nstrategy: {}\nstatus:   {} ({}%)\ntargets:  {}\n",
        deployment.id,
        deployment.release_id,
        deployment.strategy,
        deployment.status,
        deployment.percent,
        deployment.targets.join(", ")
    );
    if let Some(failure) = &deployment.failure {
        out.push_str(&format!("failure:  {}\nnext:     {}\n", failure.reason, failure.remediation));
    }
    if let Some(rollback) = &deployment.rollback_id {
        out.push_str(&format!("rollback: {rollback}\n"));
    }
    out.push('\n');
    for entry in &deployment.progress_log {
        out.push_str(&format!(
            "{} {:<5} {}{}\n",
            entry.at.format("%H:%M:%S"),
            level_label(entry.level),
            entry
                .target
                .as_deref()
                .map(|t| format!("[{t}] "))
                .unwrap_or_default(),
            entry.message
        ));
    }
    out
}

fn print_deployment(deployment: &Deployment) {
    let _span = DeploymentSpan::enter(&deployment.id, &deployment.release_id);
    info!(status = %deployment.status, entries = deployment.progress_log.len(), "deployment report");
    print!("{}", render_deployment(deployment));
}
