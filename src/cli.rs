use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use crate::config::{Config, load_config};
use crate::reconcile::{PruneLedger, Reconciler, ReconcileError, RetirementPlan, RetirementState, RunReport};
use crate::store::RestStore;

#[derive(Parser, Debug)]
#[command(name = "sessionsweep")]
#[command(about = "sessionsweep - retire duplicate chat sessions and their messages")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable verbose (DEBUG) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file (defaults to ~/.sessionsweep/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the session store, overrides config and environment
    #[arg(long, global = true)]
    pub store_url: Option<String>,

    /// Do not record or resume sessions pending message pruning
    #[arg(long, global = true)]
    pub no_ledger: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Retire duplicate sessions and delete their messages
    Run,
    /// Show which sessions would be retired, without writing anything
    Plan,
    /// Display version information
    Version,
}

pub async fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help().ok();
        println!();
        return Ok(());
    };

    match command {
        Commands::Version => print_version(),
        Commands::Plan => {
            let reconciler = reconciler_for(&cli)?;
            let plan = reconciler.plan().await?;
            print_plan(&plan);
        }
        Commands::Run => {
            let reconciler = reconciler_for(&cli)?;
            match reconciler.run().await {
                Ok(report) => print_report(&report),
                Err(err) => {
                    print_failure_hint(&err, cli.no_ledger);
                    return Err(err.into());
                }
            }
        }
    }

    Ok(())
}

fn reconciler_for(cli: &Cli) -> Result<Reconciler> {
    let config = load_config(cli.store_url.clone(), cli.config.clone())?;
    build_reconciler(&config, cli.no_ledger)
}

fn build_reconciler(config: &Config, no_ledger: bool) -> Result<Reconciler> {
    let policy = config.policy().context("Invalid duplicate policy in configuration")?;
    let store = RestStore::from_config(config).context("Cannot set up the session store")?;
    let reconciler = Reconciler::new(Arc::new(store), policy);

    if no_ledger {
        tracing::debug!("Prune ledger disabled");
        return Ok(reconciler);
    }

    match config.ledger_path.clone().or_else(PruneLedger::default_path) {
        Some(path) => {
            tracing::debug!(ledger = %path.display(), "Using prune ledger");
            Ok(reconciler.with_ledger(PruneLedger::new(path)))
        }
        None => {
            tracing::warn!("No home directory found, running without a prune ledger");
            Ok(reconciler)
        }
    }
}

fn print_version() {
    println!("sessionsweep {}", env!("CARGO_PKG_VERSION"));
}

fn print_plan(plan: &RetirementPlan) {
    println!(
        "Scanned {} active sessions across {} users",
        plan.sessions_scanned, plan.partitions
    );

    if plan.is_empty() {
        println!("No duplicate sessions found");
        return;
    }

    println!("Would retire {} duplicate sessions:", plan.len());
    for candidate in &plan.candidates {
        println!(
            "  {}  user={} position={} gap={:.1}min ({})",
            candidate.session_id,
            candidate.user_id,
            candidate.position,
            candidate.gap_minutes(),
            candidate.reason
        );
    }
    println!("Would keep {} sessions", plan.kept());
}

fn print_report(report: &RunReport) {
    if report.resumed > 0 {
        println!(
            "Pruned messages of {} sessions left over from an earlier run",
            report.resumed
        );
    }

    if report.state == RetirementState::Planned {
        println!("No duplicate sessions found");
        return;
    }

    println!(
        "Cleaned up {} duplicate sessions and their messages",
        report.retired()
    );
    if let Some(summary) = report.summary {
        println!(
            "Final stats: {} active sessions for {} users",
            summary.active_sessions, summary.distinct_users
        );
    }
}

fn print_failure_hint(err: &ReconcileError, no_ledger: bool) {
    if let ReconcileError::Delete { count, .. } = err {
        if no_ledger {
            eprintln!(
                "note: {} sessions are inactive but still have messages; they will not be picked up again",
                count
            );
        } else {
            eprintln!(
                "note: {} sessions are inactive but still have messages; the next run prunes them first",
                count
            );
        }
    }
}
