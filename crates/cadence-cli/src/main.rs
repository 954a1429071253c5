//! Cadence CLI - lifecycle pipeline orchestration
//!
//! Usage:
//!   cadence init                 Initialize Cadence in current repo
//!   cadence catalog              Print the active catalog
//!   cadence plan <work-item>     Decompose a work item and show the plan
//!   cadence run <work-item>      Run the full lifecycle on a work item
//!   cadence resume <run-id>      Continue a halted or paused run
//!   cadence status [run-id]      Show stored runs

use anyhow::{bail, Context, Result};
use cadence_core::CadenceConfig;
use cadence_orchestrator::{
    Collaborators, GitVersionControl, PhaseController, RunOutcome, RunStore, SchedulerEvent,
    ShellReviewer, ShellVerifier, ShellWorker,
};
use cadence_planning::{example_work_item, Catalog, Decomposer, WorkItem};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about = "Lifecycle pipeline orchestration")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Repository root
    #[arg(short = 'C', long, default_value = ".", global = true)]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Cadence in the repository
    Init {
        /// Also write an example work item
        #[arg(long)]
        example: bool,
    },

    /// Print the active catalog as TOML
    Catalog,

    /// Decompose a work item and print the plan
    Plan {
        /// Work item JSON file
        work_item: PathBuf,
    },

    /// Run the full lifecycle on a work item
    Run {
        /// Work item JSON file
        work_item: PathBuf,
    },

    /// Continue a halted or paused run from its last checkpoint
    Resume {
        /// Run identifier (see `cadence status`)
        run_id: String,
    },

    /// Show stored runs, or one run in detail
    Status {
        run_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { example } => cmd_init(&cli.repo, example).await,
        Commands::Catalog => cmd_catalog(&cli.repo),
        Commands::Plan { work_item } => cmd_plan(&cli.repo, &work_item),
        Commands::Run { work_item } => cmd_run(&cli.repo, &work_item).await,
        Commands::Resume { run_id } => cmd_resume(&cli.repo, &run_id).await,
        Commands::Status { run_id } => cmd_status(&cli.repo, run_id).await,
    }
}

async fn cmd_init(repo: &Path, example: bool) -> Result<()> {
    info!("Initializing Cadence in {:?}", repo);

    let config_path =
        CadenceConfig::write_default(repo).context("Failed to write default configuration")?;
    let store = RunStore::new(repo);
    tokio::fs::create_dir_all(store.dir()).await?;

    println!("Initialized Cadence in {:?}", repo);
    println!("Created:");
    println!("  {}", config_path.display());
    println!("  {}/", store.dir().display());

    if example {
        let item_path = config_path.with_file_name("work-item.json");
        tokio::fs::write(&item_path, serde_json::to_string_pretty(&example_work_item())?)
            .await
            .context("Failed to write example work item")?;
        println!("  {}", item_path.display());
    }

    println!("\nNext steps:");
    println!("  1. Set worker.command and reviewer.command in {}", config_path.display());
    println!("  2. Run 'cadence plan <work-item>' to preview the decomposition");
    println!("  3. Run 'cadence run <work-item>' to start");
    Ok(())
}

fn cmd_catalog(repo: &Path) -> Result<()> {
    let config = load_config(repo)?;
    let catalog = load_catalog(repo, &config)?;
    print!("{}", catalog.to_toml()?);
    Ok(())
}

fn cmd_plan(repo: &Path, work_item: &Path) -> Result<()> {
    let config = load_config(repo)?;
    let catalog = load_catalog(repo, &config)?;
    let item = WorkItem::load(work_item)
        .with_context(|| format!("Failed to read work item {}", work_item.display()))?;

    let decomposer = Decomposer::new(&catalog).with_review_domains(config.review.domains.clone());
    let plan = decomposer.decompose(&item).context("Decomposition failed")?;
    println!("{}", decomposer.summarize(&plan));
    Ok(())
}

async fn cmd_run(repo: &Path, work_item: &Path) -> Result<()> {
    let item = WorkItem::load(work_item)
        .with_context(|| format!("Failed to read work item {}", work_item.display()))?;
    let controller = build_controller(repo)?;

    info!("Starting run for {}", item.name);
    let outcome = controller.run(item).await?;
    report(&outcome)
}

async fn cmd_resume(repo: &Path, run_id: &str) -> Result<()> {
    let controller = build_controller(repo)?;
    let outcome = controller
        .resume(run_id)
        .await
        .with_context(|| format!("Failed to resume {}", run_id))?;
    report(&outcome)
}

async fn cmd_status(repo: &Path, run_id: Option<String>) -> Result<()> {
    let store = RunStore::new(repo);

    let Some(run_id) = run_id else {
        let runs = store.list().await?;
        println!("Cadence Runs");
        println!("============");
        if runs.is_empty() {
            println!("\nNo runs recorded");
        }
        for run in runs {
            let phase = run
                .phase
                .map(|p| p.to_string())
                .unwrap_or_else(|| "done".to_string());
            let checkpoint = run
                .last_checkpoint
                .map(|g| format!("G{}", g))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{}  {:<24} phase: {:<10} checkpoint: {:<4} updated: {}",
                run.run_id,
                run.work_item,
                phase,
                checkpoint,
                run.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        return Ok(());
    };

    let state = store
        .load(&run_id)
        .await
        .with_context(|| format!("No run named {}", run_id))?;
    println!("Run {}", state.run_id);
    println!("  Work item:   {}", state.work_item.name);
    println!("  Catalog:     v{}", state.catalog_version);
    println!("  Lifecycle:   {:?}", state.lifecycle);
    println!(
        "  Phases done: {}",
        state
            .phases
            .completed()
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    for checkpoint in &state.checkpoints {
        println!(
            "  G{} committed as {} ({} artifacts)",
            checkpoint.group,
            checkpoint.commit_ref,
            checkpoint.artifacts.len()
        );
    }
    if state.corrective_cycles > 0 {
        println!("  Corrective cycles: {}", state.corrective_cycles);
    }
    if let Some(review) = &state.review {
        println!("\n{}", review);
    }
    if let Some(halt) = &state.halt {
        println!("\nStopped: {}", halt);
    }
    Ok(())
}

fn load_config(repo: &Path) -> Result<CadenceConfig> {
    CadenceConfig::load_or_default(repo).context("Failed to load .cadence/config.toml")
}

fn load_catalog(repo: &Path, config: &CadenceConfig) -> Result<Catalog> {
    match &config.catalog_path {
        Some(path) => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                repo.join(path)
            };
            Catalog::load(&path)
                .with_context(|| format!("Failed to load catalog {}", path.display()))
        }
        None => Ok(Catalog::builtin()),
    }
}

/// Wire the shell and git backends into a controller
fn build_controller(repo: &Path) -> Result<PhaseController> {
    let config = load_config(repo)?;
    let catalog = load_catalog(repo, &config)?;

    let worker = ShellWorker::from_config(&config.worker, repo)?;
    let verifier = ShellVerifier::new(repo, &config.verification)?;
    let reviewer = ShellReviewer::from_config(&config.reviewer, repo)?;
    let collaborators = Collaborators {
        worker: Arc::new(worker),
        verifier: Arc::new(verifier),
        vcs: Arc::new(GitVersionControl::new(repo)),
        reviewer: Arc::new(reviewer),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping at the current group barrier");
            on_signal.cancel();
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(print_progress(rx));

    Ok(
        PhaseController::new(config, catalog, collaborators, RunStore::new(repo))
            .with_cancellation(cancel)
            .with_events(tx),
    )
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<SchedulerEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SchedulerEvent::GroupDispatched { group, tasks } => {
                println!("G{}: dispatching {} task(s)", group, tasks)
            }
            SchedulerEvent::TaskStarted {
                task,
                tier,
                attempt,
            } => println!("  {} @ {} (attempt {})", task, tier, attempt),
            SchedulerEvent::TaskFinished { task, succeeded } => {
                if !succeeded {
                    println!("  {} failed", task);
                }
            }
            SchedulerEvent::TaskEscalated { task, from, to } => {
                println!("  {} escalated {} -> {}", task, from, to)
            }
            SchedulerEvent::TaskParked { task } => {
                println!("  {} parked for manual resolution", task)
            }
            SchedulerEvent::GroupVerified {
                group,
                passed,
                class,
            } => match (passed, class) {
                (true, _) => println!("G{}: verified", group),
                (false, Some(class)) => println!("G{}: verification failed ({})", group, class),
                (false, None) => println!("G{}: verification failed", group),
            },
            SchedulerEvent::GroupCommitted { group, commit_ref } => {
                println!("G{}: committed {}", group, commit_ref)
            }
            SchedulerEvent::GroupFailed { group, reason } => {
                println!("G{}: stopped: {}", group, reason)
            }
        }
    }
}

fn report(outcome: &RunOutcome) -> Result<()> {
    println!("\nRun {}: {}", outcome.run_id, outcome.status);
    print!("{}", outcome.checklist);
    if let Some(halt) = &outcome.halt {
        println!("\n{}", halt);
        println!("Resume with: cadence resume {}", outcome.run_id);
    }
    if !outcome.status.is_complete() {
        bail!("run {} did not complete", outcome.run_id);
    }
    Ok(())
}
