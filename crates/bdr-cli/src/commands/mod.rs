//! Command handler modules for bde-relay.
//!
//! Shared wiring lives here: config resolution, the job store, the process
//! lock and the collaborator set handed to the orchestrator. Command
//! handlers live in the submodules.

pub mod process;
pub mod support;

use std::path::Path;

use anyhow::{anyhow, Result};

use bdr_bde::PgBdeSource;
use bdr_config::Config;
use bdr_job::{Job, JobStore};
use bdr_notify::{notifier_for, Notifier};
use bdr_orchestrator::Orchestrator;
use bdr_platform::PlatformClient;
use bdr_store::{FileJobStore, ProcessLock};

pub struct App {
    pub config: Config,
    pub store: FileJobStore,
}

impl App {
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let path = bdr_config::resolve_path(config_file)?;
        let config = bdr_config::load_layered(&[path.as_path()])?;
        let store = FileJobStore::new(&config.job_path);
        Ok(Self { config, store })
    }

    /// Commands that mutate job state run one-at-a-time, failing fast when
    /// another invocation holds the lock.
    pub fn lock(&self) -> Result<ProcessLock> {
        ProcessLock::acquire(&self.config.lock_path(), false)
    }

    pub fn load_job(&self, job_id: i64) -> Result<Job> {
        self.store
            .load(job_id)?
            .ok_or_else(|| anyhow!("Job {job_id} not found"))
    }

    /// Connect the remote collaborators. Only commands that talk to the
    /// staging database and the platform pay this cost.
    pub async fn services(&self) -> Result<Services> {
        let pool = bdr_bde::connect_from_env().await?;
        Ok(Services {
            platform: PlatformClient::from_env(&self.config.platform.endpoint)?,
            bde: PgBdeSource::new(pool),
            notify: notifier_for(self.config.notify.webhook_url.as_deref()),
        })
    }
}

pub struct Services {
    pub platform: PlatformClient,
    pub bde: PgBdeSource,
    pub notify: Box<dyn Notifier>,
}

impl Services {
    pub fn orchestrator<'a>(&'a self, app: &'a App) -> Orchestrator<'a> {
        Orchestrator::new(
            &app.config,
            &self.platform,
            &self.bde,
            &app.store,
            self.notify.as_ref(),
        )
    }
}
