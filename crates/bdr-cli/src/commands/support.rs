//! Operator-facing handlers: manual import control, cron progression,
//! inspection and reporting.

use anyhow::{bail, Result};
use tracing::{info, warn};

use bdr_bde::BdeSource;
use bdr_job::{Job, JobState, JobStore};
use bdr_notify::Severity;
use bdr_verify::VerifyLevel;

use super::App;

/// Manually start an import when the BDE event hooks never ran. Refuses to
/// clobber an existing job file; that is what continue-import is for.
pub async fn start_import(
    app: &App,
    job_id: i64,
    ignore_bde_state: bool,
    ignore_schedule: bool,
) -> Result<()> {
    info!(job_id, "start-import");
    let _lock = app.lock()?;

    if app.store.load(job_id)?.is_some() {
        bail!("Job {job_id} already exists: use 'continue-import'?");
    }

    let svc = app.services().await?;
    let orch = svc.orchestrator(app);
    let mut job = Job::create(job_id);
    orch.update_job(&mut job, None, VerifyLevel::All).await?;

    info!("starting update...");
    orch.start_update(&mut job, !ignore_bde_state, ignore_schedule)
        .await?;
    println!("{job}");
    Ok(())
}

/// Re-run the import-starting stage. Appropriate after API errors setting
/// up imports or creating a publish; layers already tagged for this job are
/// left alone.
pub async fn continue_import(app: &App, job_id: i64, ignore_bde_state: bool) -> Result<()> {
    info!(job_id, "continue-import");
    let _lock = app.lock()?;

    let mut job = app.load_job(job_id)?;
    if !job.state.can_start_update() {
        bail!("Invalid job state for continue-import: {}", job.state);
    }

    let svc = app.services().await?;
    let orch = svc.orchestrator(app);
    orch.start_update(&mut job, !ignore_bde_state, false).await?;
    println!("{job}");
    Ok(())
}

/// Check and progress import status, approving verified publishes.
pub async fn check_import(
    app: &App,
    job_id: i64,
    verify_level: &str,
    state: Option<&str>,
) -> Result<()> {
    info!(job_id, "check-import");
    let level = VerifyLevel::parse(verify_level)?;
    let state_override = state.map(JobState::parse).transpose()?;
    let _lock = app.lock()?;

    let mut job = app.load_job(job_id)?;
    let svc = app.services().await?;
    let orch = svc.orchestrator(app);
    orch.update_job(&mut job, state_override, level).await?;
    println!("{job}");
    Ok(())
}

/// Cron entry point: find the latest Upload's job and progress it.
pub async fn cron_monitor(app: &App) -> Result<()> {
    info!("cron-monitor");
    let _lock = app.lock()?;

    let svc = app.services().await?;
    let Some(upload) = svc.bde.latest_upload().await? else {
        warn!("no latest BDE Upload");
        return Ok(());
    };
    let Some(mut job) = app.store.load(upload.id)? else {
        warn!("no matching job found for Upload {}", upload.id);
        return Ok(());
    };

    let orch = svc.orchestrator(app);
    orch.update_job(&mut job, None, VerifyLevel::All).await?;
    info!(job_id = job.id, state = %job.state, "cron pass complete");
    Ok(())
}

/// Abandon an update, cancelling its publishes.
pub async fn abandon(app: &App, job_id: i64) -> Result<()> {
    info!(job_id, "abandon");
    let _lock = app.lock()?;

    let mut job = app.load_job(job_id)?;
    let svc = app.services().await?;
    let orch = svc.orchestrator(app);
    orch.abandon_update(&mut job).await?;
    println!("{job}");
    Ok(())
}

/// Show the stored job file. Reads only the store; no remote calls.
pub fn show(app: &App, job_id: i64) -> Result<()> {
    let job = app.load_job(job_id)?;
    println!("{job}");
    Ok(())
}

/// Show the current/latest BDE Upload and whether a job tracks it.
pub async fn bde_current(app: &App, verbose: u8) -> Result<()> {
    let pool = bdr_bde::connect_from_env().await?;
    let bde = bdr_bde::PgBdeSource::new(pool);
    let Some(upload) = bde.latest_upload().await? else {
        bail!("no latest BDE Upload");
    };

    println!("{}", upload.id);
    if verbose > 0 {
        println!("{}", serde_yaml::to_string(&upload)?);
    }

    match app.store.load(upload.id)? {
        Some(job) => info!("matching job: state={}", job.state),
        None => warn!("no matching job found for Upload {}", upload.id),
    }
    Ok(())
}

/// Refresh the job, then send its error report.
pub async fn error_email(app: &App, job_id: i64) -> Result<()> {
    info!(job_id, "error-email");
    let _lock = app.lock()?;

    let mut job = app.load_job(job_id)?;
    let svc = app.services().await?;
    let orch = svc.orchestrator(app);
    orch.update_job(&mut job, None, VerifyLevel::All).await?;

    let report = orch.error_report_for(&job)?;
    orch.send_report(Severity::Error, &report).await;
    println!("{job}");
    Ok(())
}
