//! bde-relay entry point.
//!
//! This file is intentionally thin: it parses arguments, sets up tracing
//! and dispatches. All command handlers live in `commands/`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::App;

#[derive(Parser)]
#[command(name = "bde-relay")]
#[command(about = "Relay BDE bulk extracts onto the publishing platform", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase verbosity (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only produce error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file location (overrides $BDR_CONFIG and the default path)
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// [Internal] BDE hook: extract run started
    ProcessStart { job_id: i64 },

    /// [Internal] BDE hook: extract run completed
    ProcessFinish { job_id: i64 },

    /// [Internal] BDE hook: extract run failed
    ProcessError {
        job_id: i64,

        /// Failure detail reported by the extract subsystem
        #[arg(long)]
        reason: Option<String>,
    },

    /// Manually start an import (when the BDE hooks never ran)
    StartImport {
        job_id: i64,

        /// Don't require the BDE Upload to be complete
        #[arg(long)]
        ignore_bde_state: bool,

        /// Ignore the configured group schedules
        #[arg(long)]
        ignore_schedule: bool,
    },

    /// Re-run the import-starting stage after partial failures
    ContinueImport {
        job_id: i64,

        /// Don't require the BDE Upload to be complete
        #[arg(long)]
        ignore_bde_state: bool,
    },

    /// Check and progress import status (approvals, state updates)
    CheckImport {
        job_id: i64,

        /// Verification before approving: all | counts | none
        #[arg(long, default_value = "all")]
        verify_level: String,

        /// Process the job as if it were in this state
        #[arg(long)]
        state: Option<String>,
    },

    /// [Internal] Cron: check and progress the latest job
    CronMonitor,

    /// Abandon an update, cancelling its publishes
    Abandon { job_id: i64 },

    /// Show the stored job file
    Show { job_id: i64 },

    /// Show the current/latest BDE Upload
    BdeCurrent,

    /// Send the error report for a failed job
    ErrorEmail { job_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if missing —
    // production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let app = App::load(cli.config_file.as_deref())?;

    match cli.cmd {
        Commands::ProcessStart { job_id } => commands::process::start(&app, job_id).await,
        Commands::ProcessFinish { job_id } => commands::process::finish(&app, job_id).await,
        Commands::ProcessError { job_id, reason } => {
            commands::process::error(&app, job_id, reason.as_deref()).await
        }
        Commands::StartImport {
            job_id,
            ignore_bde_state,
            ignore_schedule,
        } => commands::support::start_import(&app, job_id, ignore_bde_state, ignore_schedule).await,
        Commands::ContinueImport {
            job_id,
            ignore_bde_state,
        } => commands::support::continue_import(&app, job_id, ignore_bde_state).await,
        Commands::CheckImport {
            job_id,
            verify_level,
            state,
        } => commands::support::check_import(&app, job_id, &verify_level, state.as_deref()).await,
        Commands::CronMonitor => commands::support::cron_monitor(&app).await,
        Commands::Abandon { job_id } => commands::support::abandon(&app, job_id).await,
        Commands::Show { job_id } => commands::support::show(&app, job_id),
        Commands::BdeCurrent => commands::support::bde_current(&app, cli.verbose).await,
        Commands::ErrorEmail { job_id } => commands::support::error_email(&app, job_id).await,
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}
