//! bdr-orchestrator
//!
//! Drives a Job through its lifecycle: mirror the BDE Upload state, create
//! publish groups and draft layer versions on the platform, poll remote
//! publishes, verify consistency before approving, and settle the job into
//! a terminal state. All collaborators are trait objects so the whole flow
//! runs against fakes in tests.

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use bdr_bde::BdeSource;
use bdr_config::{Config, GroupConfig};
use bdr_job::{group_reference, job_reference, Job, JobState, JobStore, Upload, UploadStatus};
use bdr_notify::report::{error_report, success_report, Report};
use bdr_notify::{Notifier, Severity};
use bdr_platform::{LayerVersion, PlatformApi, PlatformError, PublishDraft, PublishItem, PublishState};
use bdr_verify::{verify_group, VerifyError, VerifyLevel};

pub struct Orchestrator<'a> {
    config: &'a Config,
    platform: &'a dyn PlatformApi,
    bde: &'a dyn BdeSource,
    store: &'a dyn JobStore,
    notify: &'a dyn Notifier,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        platform: &'a dyn PlatformApi,
        bde: &'a dyn BdeSource,
        store: &'a dyn JobStore,
        notify: &'a dyn Notifier,
    ) -> Self {
        Self {
            config,
            platform,
            bde,
            store,
            notify,
        }
    }

    /// Refresh the job's denormalized Upload copy from the control table.
    /// The Upload row must still exist; the job is named after it.
    async fn snapshot_upload(&self, job: &mut Job) -> Result<Upload> {
        let upload = self
            .bde
            .upload(job.id)
            .await?
            .ok_or_else(|| anyhow!("Upload {} not found", job.id))?;
        job.bde_upload = Some(upload.clone());
        job.last_update = Some(Utc::now());
        Ok(upload)
    }

    /// Reconcile the job against the Upload row and the remote publishes,
    /// progressing it as far as the observed state allows. `state_override`
    /// processes the job as if it were in that state.
    pub async fn update_job(
        &self,
        job: &mut Job,
        state_override: Option<JobState>,
        level: VerifyLevel,
    ) -> Result<()> {
        info!(job_id = job.id, state = %job.state, "updating job");
        let upload = self.snapshot_upload(job).await?;
        let effective = state_override.unwrap_or(job.state);

        if matches!(effective, JobState::New | JobState::BdeRunning) {
            let prev = job.state;
            let next = match upload.status {
                UploadStatus::Uninitialised => JobState::New,
                UploadStatus::Active => JobState::BdeRunning,
                UploadStatus::Completed => JobState::BdeFinished,
                UploadStatus::Errored => JobState::BdeError,
            };
            job.set_state(next);
            if prev != next {
                info!(job_id = job.id, upload = upload.status.as_code(), "job state {prev} -> {next}");
                self.notify
                    .notify(Severity::Info, &format!("Job {}:\n{prev} -> {next}", job.id))
                    .await;
            }
        }

        if effective == JobState::Importing {
            self.poll_publish_groups(job, level).await?;
        }

        self.store.save(job)?;
        Ok(())
    }

    /// Poll every publish group, approving verified publishes, and settle
    /// the job once every group's publish is terminal. Groups that never got
    /// a publish created keep the job open.
    async fn poll_publish_groups(&self, job: &mut Job, level: VerifyLevel) -> Result<()> {
        let now = Utc::now();
        let mut all_terminal = !job.groups.is_empty();
        let mut all_succeeded = all_terminal;

        let names: Vec<String> = job.groups.keys().cloned().collect();
        for name in names {
            let Some(group) = job.groups.get(&name) else {
                continue;
            };
            let Some(publish_id) = group.publish_id else {
                all_terminal = false;
                all_succeeded = false;
                continue;
            };
            info!(job_id = job.id, group = %name, publish_id, "polling publish group");
            let mut publish = self.platform.get_publish(publish_id).await?;

            if publish.state == PublishState::WaitingForApproval {
                let layer_versions = group.layer_versions.clone();
                match verify_group(
                    self.platform,
                    self.bde,
                    &self.config.bde.tables,
                    &layer_versions,
                    level,
                )
                .await
                {
                    Ok(()) => {
                        if level == VerifyLevel::None {
                            warn!(group = %name, "approving publish without verification");
                        }
                        self.platform.approve_publish(publish_id).await?;
                        publish = self.platform.get_publish(publish_id).await?;
                        self.notify
                            .notify(
                                Severity::Info,
                                &format!(
                                    "Job {}: Group {name}: BDE consistency check passed - publishing now",
                                    job.id
                                ),
                            )
                            .await;
                    }
                    Err(VerifyError::Consistency(issues)) => {
                        let detail = issues
                            .iter()
                            .map(|i| i.to_string())
                            .collect::<Vec<_>>()
                            .join("\n");
                        warn!(job_id = job.id, group = %name, "consistency errors:\n{detail}");
                        job.set_state(JobState::Errors);
                        job.has_publish_errors = true;
                        job.group_mut(&name).error = Some(detail.clone());
                        self.notify
                            .notify(
                                Severity::Error,
                                &format!(
                                    "Job {}:\nGroup {name}: BDE consistency errors:\n{detail}",
                                    job.id
                                ),
                            )
                            .await;
                        // the other groups still get polled
                    }
                    Err(e) => return Err(anyhow!(e)),
                }
            }

            let group = job.group_mut(&name);
            group.publish_state = Some(publish.state.as_str().to_string());
            group.last_update = Some(now);
            if publish.state.is_terminal() {
                all_succeeded &= publish.state.is_success();
            } else {
                all_terminal = false;
                all_succeeded = false;
            }
        }

        if all_terminal {
            if all_succeeded {
                info!(job_id = job.id, "all publishes complete");
                job.set_state(JobState::Complete);
                self.send_report(Severity::Info, &success_report(job, &self.config.platform.endpoint))
                    .await;
                self.notify
                    .notify(Severity::Info, &format!("Job {}: Publishes complete", job.id))
                    .await;
            } else {
                // Cancels by this tool move the job to abandoned first, so a
                // cancelled publish seen here was cancelled externally.
                warn!(job_id = job.id, "all publishes done, some with errors or external cancellations");
                job.set_state(JobState::Errors);
                self.notify
                    .notify(
                        Severity::Error,
                        &format!(
                            "Job {}: Publishes done, some with errors or external cancellations",
                            job.id
                        ),
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Begin the re-import of every configured publish group whose schedule
    /// matches today. Groups are independent: one failing to set up does not
    /// stop the others, but a failure of every configured group is fatal.
    pub async fn start_update(
        &self,
        job: &mut Job,
        check_bde_state: bool,
        ignore_schedule: bool,
    ) -> Result<()> {
        info!(job_id = job.id, "starting platform update");

        let upload = self.snapshot_upload(job).await?;
        if upload.status != UploadStatus::Completed {
            if check_bde_state {
                bail!(
                    "BDE Upload isn't complete yet ({}), can't start the update",
                    upload.status.display()
                );
            }
            warn!(
                "BDE Upload isn't complete yet ({}), ignoring",
                upload.status.display()
            );
        }
        job.set_state(JobState::BdeFinished);
        self.store.save(job)?;

        let mut first = true;
        let mut errors: Vec<(String, String)> = Vec::new();
        for group_cfg in &self.config.bde.groups {
            if !schedule_allows(group_cfg)? {
                if ignore_schedule || self.config.debug {
                    warn!(
                        group = %group_cfg.name,
                        schedule = ?group_cfg.schedule,
                        "ignoring schedule and importing anyway"
                    );
                } else {
                    info!(
                        group = %group_cfg.name,
                        schedule = ?group_cfg.schedule,
                        "schedule doesn't match, not starting imports"
                    );
                    continue;
                }
            }

            if first {
                self.notify
                    .notify(Severity::Info, &format!("Job {}: Starting update...", job.id))
                    .await;
                first = false;
            }

            if let Err(e) = self.start_group(job, group_cfg).await {
                if self.config.debug {
                    return Err(e);
                }
                error!(job_id = job.id, group = %group_cfg.name, "group setup failed: {e:#}");
                job.group_mut(&group_cfg.name).error = Some(format!("{e:#}"));
                job.has_import_errors = true;
                errors.push((group_cfg.name.clone(), format!("{e:#}")));
                self.store.save(job)?;
            }
        }

        if !job.groups.is_empty() {
            job.set_state(JobState::Importing);
        }

        // Schedule-skipped groups count towards the total: with one group
        // skipped and the other failing, the job stays importing so the
        // skipped group can still run on its day.
        if !errors.is_empty() && errors.len() == self.config.bde.groups.len() {
            let detail = errors
                .iter()
                .map(|(name, e)| format!("{name}: {e}"))
                .collect::<Vec<_>>()
                .join("\n");
            job.set_state(JobState::Errors);
            self.store.save(job)?;
            self.notify
                .notify(
                    Severity::Error,
                    &format!("Job {}: Errors creating ALL update groups:\n{detail}", job.id),
                )
                .await;
            bail!("errors creating all update groups:\n{detail}");
        }

        self.store.save(job)?;
        Ok(())
    }

    /// Set up one publish group: a draft version per layer, imports started,
    /// all gathered under a single reference-keyed publish. An existing
    /// publish with this group's reference is adopted instead, making
    /// re-runs idempotent.
    async fn start_group(&self, job: &mut Job, group_cfg: &GroupConfig) -> Result<()> {
        let reference = group_reference(job.id, &group_cfg.name);
        info!(job_id = job.id, group = %group_cfg.name, %reference, "starting publish group");

        let existing = self.platform.list_publishes(&reference).await?;
        let publish = match existing.into_iter().next() {
            Some(publish) => {
                info!(publish_id = publish.id, "existing publish, adopting");
                publish
            }
            None => {
                let supplier_ref = job_reference(job.id);
                let mut draft = PublishDraft::manual(&reference);
                let total = group_cfg.layers.len();
                for (i, &layer_id) in group_cfg.layers.iter().enumerate() {
                    info!("layer [{}/{total}]: {layer_id}", i + 1);
                    let version = self.start_layer(&supplier_ref, layer_id).await?;
                    info!(layer_id, version_id = version.id, "new version");
                    job.group_mut(&group_cfg.name)
                        .layer_versions
                        .insert(layer_id, version.id);
                    // checkpoint after every layer so a crash resumes here
                    self.store.save(job)?;
                    draft.items.push(PublishItem {
                        layer_id,
                        version_id: version.id,
                    });
                }
                let publish = self.platform.create_publish(&draft).await?;
                info!(publish_id = publish.id, group = %group_cfg.name, "publish created");
                publish
            }
        };

        let group = job.group_mut(&group_cfg.name);
        group.publish_id = Some(publish.id);
        group.created_at = publish.created_at;
        group.publish_state = Some(publish.state.as_str().to_string());
        group.last_update = Some(Utc::now());
        group.error = None;
        self.store.save(job)?;
        Ok(())
    }

    /// Create (or adopt) a draft version of one layer and start its
    /// re-import. A draft already tagged with this job's reference is
    /// adopted as-is, import and all.
    async fn start_layer(&self, supplier_ref: &str, layer_id: i64) -> Result<LayerVersion> {
        let layer = match self.platform.get_layer(layer_id).await {
            Ok(layer) => layer,
            Err(PlatformError::NotFound(_)) => bail!("Layer {layer_id} not found"),
            Err(e) => return Err(e.into()),
        };

        let version = if layer.has_draft() {
            warn!(
                layer_id,
                draft = ?layer.latest_version,
                "layer already has a draft version"
            );
            let draft = self.platform.get_draft_version(layer_id).await?;
            if draft.supplier_reference.as_deref() == Some(supplier_ref) {
                warn!(layer_id, "draft already tagged for this job, skipping");
                return Ok(draft);
            }
            self.platform
                .set_supplier_reference(layer_id, draft.id, supplier_ref)
                .await?
        } else {
            self.platform
                .create_draft_version(layer_id, supplier_ref)
                .await?
        };

        match self.platform.start_import(layer_id, version.id).await {
            Ok(version) => {
                info!(layer_id, "import started");
                Ok(version)
            }
            Err(PlatformError::Conflict(_)) if !self.config.debug => {
                bail!(
                    "Layer {layer_id} (version {}) import failed with a conflict",
                    version.id
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record a failure reported by the extract subsystem's error hook.
    pub async fn error_update(&self, job: &mut Job, reason: Option<&str>) -> Result<()> {
        info!(job_id = job.id, reason, "BDE error reported");
        job.set_state(JobState::BdeError);
        self.snapshot_upload(job).await?;
        if let Some(upload) = job.bde_upload.as_mut() {
            upload.error_reason = reason.map(str::to_string);
        }
        self.store.save(job)?;
        self.notify
            .notify(
                Severity::Error,
                &format!(
                    "Job {}: BDE Processor Error: {}",
                    job.id,
                    reason.unwrap_or("unknown")
                ),
            )
            .await;
        Ok(())
    }

    /// Abandon the job, cancelling any still-cancellable publishes. A race
    /// where the platform refuses the cancel is tolerated; the job is marked
    /// abandoned regardless.
    pub async fn abandon_update(&self, job: &mut Job) -> Result<()> {
        info!(job_id = job.id, "abandoning job");
        let mut cancelled = 0u32;

        if job.state == JobState::Importing {
            for (name, group) in &job.groups {
                let Some(publish_id) = group.publish_id else {
                    continue;
                };
                let publish = self.platform.get_publish(publish_id).await?;
                if publish.state.is_terminal() {
                    info!(publish_id, state = %publish.state, "publish already settled");
                    continue;
                }
                info!(publish_id, group = %name, "cancelling publish");
                match self.platform.cancel_publish(publish_id).await {
                    Ok(()) => cancelled += 1,
                    Err(PlatformError::Conflict(m)) if !self.config.debug => {
                        error!("conflict cancelling publish {publish_id}: {m}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        job.set_state(JobState::Abandoned);
        self.snapshot_upload(job).await?;
        self.store.save(job)?;
        self.notify
            .notify(
                Severity::Error,
                &format!("Job {}: Abandoned. Cancelled {cancelled} publishes", job.id),
            )
            .await;
        Ok(())
    }

    /// Format the error report for a job in an error state.
    pub fn error_report_for(&self, job: &Job) -> Result<Report> {
        if !job.state.is_error_state() {
            bail!("Job {} isn't in an error state ({})", job.id, job.state);
        }
        Ok(error_report(job, &self.config.platform.endpoint))
    }

    /// Hand a report to the notification sink, or log it in debug mode.
    pub async fn send_report(&self, severity: Severity, report: &Report) {
        let subject = report.subject_with(self.config.notify.subject_prefix.as_deref());
        if self.config.debug {
            info!("debug, not sending report\nSubject: {subject}\n{}", report.body);
            return;
        }
        self.notify
            .notify(severity, &format!("{subject}\n{}", report.body))
            .await;
    }
}

fn schedule_allows(group_cfg: &GroupConfig) -> Result<bool> {
    bdr_config::schedule_matches_today(group_cfg.schedule.as_deref())
}
