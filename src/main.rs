//! CLI entry point: rehearse drift analysis and rebalance runs against a
//! wallet snapshot.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use yield_rebalancer::chain::{ChainGateway, FixedAllocation, SimulatedChain};
use yield_rebalancer::config::Config;
use yield_rebalancer::engine::RebalanceEngine;
use yield_rebalancer::error::Error;
use yield_rebalancer::executor::ProgressObserver;
use yield_rebalancer::snapshot::WalletSnapshot;
use yield_rebalancer::store::{MemoryHistory, MemorySettings, RunTrigger};

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Portfolio rebalancer for on-chain yield positions")]
#[command(version)]
struct Cli {
    /// Path to config.toml (built-in defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show drift between current holdings and the target allocation
    Drift {
        /// Path to snapshot.json
        snapshot: PathBuf,
    },

    /// Plan and execute a rebalance against the snapshot's simulated chain
    Run {
        /// Path to snapshot.json
        snapshot: PathBuf,

        /// Show the plan without executing
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation and the drift-threshold gate
        #[arg(long)]
        force: bool,
    },
}

struct ConsoleProgress;

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&self, pct: f64, message: &str) {
        println!("  {pct:>5.1}%  {message}");
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {e}");
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    let result = match cli.command {
        Command::Drift { snapshot } => run_drift(&config, &snapshot),
        Command::Run {
            snapshot,
            dry_run,
            force,
        } => run_rebalance(&config, &snapshot, dry_run, force),
    };

    if let Err(e) = result {
        match &e {
            Error::Aborted(msg) => {
                eprintln!("{msg}");
                process::exit(0);
            }
            Error::SettingsValidation(_) | Error::ConcurrentRun { .. } => {
                eprintln!("\nRejected: {e}");
                process::exit(2);
            }
            _ => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}

/// Wire an engine around the snapshot's simulated collaborators.
fn build_engine(
    config: &Config,
    snapshot: &WalletSnapshot,
) -> yield_rebalancer::error::Result<RebalanceEngine> {
    let chain = Arc::new(SimulatedChain::new(snapshot.quote_price_cents));
    chain.set_holdings(&snapshot.wallet, snapshot.holdings()?);
    for protocol in snapshot.failing()? {
        chain.fail_protocol(protocol);
    }

    let allocations = Arc::new(FixedAllocation::new(snapshot.target()?));
    let engine = RebalanceEngine::new(
        chain as Arc<dyn ChainGateway>,
        allocations,
        Arc::new(MemorySettings::new()),
        Arc::new(MemoryHistory::with_cap(config.engine.history_cap)),
        config,
    );
    engine.with_audit(&config.audit_path())
}

fn run_drift(config: &Config, snapshot_path: &PathBuf) -> yield_rebalancer::error::Result<()> {
    let snapshot = WalletSnapshot::load(snapshot_path)?;
    let engine = build_engine(config, &snapshot)?;

    let report = engine.check_drift(&snapshot.wallet)?;
    println!(
        "Wallet {}: portfolio value ${:.2}\n",
        snapshot.wallet,
        report.total_value_cents as f64 / 100.0,
    );
    print!("{report}");
    Ok(())
}

fn run_rebalance(
    config: &Config,
    snapshot_path: &PathBuf,
    dry_run: bool,
    force: bool,
) -> yield_rebalancer::error::Result<()> {
    let snapshot = WalletSnapshot::load(snapshot_path)?;
    let engine = build_engine(config, &snapshot)?;
    let wallet = snapshot.wallet.as_str();

    let (report, plan) = engine.plan_preview(wallet)?;
    print!("{report}");

    if !report.needs_rebalance && !force {
        println!("\nDrift below threshold, nothing to do (use --force to override).");
        return Ok(());
    }

    display_plan(&plan);

    if dry_run {
        println!("\n[DRY RUN] No operations submitted.");
        return Ok(());
    }

    if !force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Execute?")
            .default(false)
            .interact()
            .map_err(|e| Error::Aborted(format!("confirmation prompt failed: {e}")))?;

        if !confirmed {
            return Err(Error::Aborted("Aborted.".into()));
        }
    }

    let trigger = if force {
        RunTrigger::Forced
    } else {
        RunTrigger::Manual
    };
    println!();
    let record = engine.run_with_observer(wallet, trigger, &ConsoleProgress)?;

    let succeeded = record.operations.iter().filter(|r| r.is_success()).count();
    let failed = record.operations.len() - succeeded;
    println!(
        "\nRun {}: {succeeded} confirmed, {failed} failed. Audit logged to {}",
        record.status,
        config.audit_path().display(),
    );
    if !record.detail.is_empty() {
        println!("  {}", record.detail);
    }

    Ok(())
}

fn display_plan(plan: &yield_rebalancer::planner::PlanOutcome) {
    if plan.operations.is_empty() {
        println!("\nNo executable operations.");
    } else {
        println!("\nPLAN:");
        for (i, op) in plan.operations.iter().enumerate() {
            println!("  {:>3}  {}", i + 1, op);
        }
    }
    for skip in &plan.skipped {
        println!("  skipped {}: {}", skip.protocol, skip.reason);
    }
}
