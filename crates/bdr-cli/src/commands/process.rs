//! Handlers for the extract subsystem's event hooks: process-start,
//! process-finish and process-error run from the uploader's hook config.

use anyhow::{bail, Result};
use tracing::info;

use bdr_job::{Job, JobStore};
use bdr_verify::VerifyLevel;

use super::App;

/// Extract run started: create the job file and take the first snapshot.
pub async fn start(app: &App, job_id: i64) -> Result<()> {
    info!(job_id, "process-start");
    let _lock = app.lock()?;

    if app.store.load(job_id)?.is_some() {
        bail!("Job {job_id} already exists");
    }

    let svc = app.services().await?;
    let orch = svc.orchestrator(app);
    let mut job = Job::create(job_id);
    orch.update_job(&mut job, None, VerifyLevel::All).await?;
    println!("{job}");
    Ok(())
}

/// Extract run completed: kick off the platform update.
pub async fn finish(app: &App, job_id: i64) -> Result<()> {
    info!(job_id, "process-finish");
    let _lock = app.lock()?;

    let mut job = app.load_job(job_id)?;
    let svc = app.services().await?;
    let orch = svc.orchestrator(app);
    orch.start_update(&mut job, true, false).await?;
    println!("{job}");
    Ok(())
}

/// Extract run failed: record the failure on the job.
pub async fn error(app: &App, job_id: i64, reason: Option<&str>) -> Result<()> {
    info!(job_id, "process-error");
    let _lock = app.lock()?;

    let mut job = app.load_job(job_id)?;
    let svc = app.services().await?;
    let orch = svc.orchestrator(app);
    orch.error_update(&mut job, reason).await?;
    println!("{job}");
    Ok(())
}
