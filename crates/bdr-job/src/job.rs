use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::state::JobState;
use crate::upload::Upload;

/// One append-only change-log entry: the moment `state` took a new value.
/// An audit trail only; never used for control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub at: DateTime<Utc>,
    pub state: JobState,
}

/// Per-group progress within a Job, keyed by group name in `Job::groups`.
///
/// Once `publish_id` is set it never changes for this group within the job,
/// and `layer_versions` is fixed once the publish exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
    /// layer id -> version id created for this job's import pass.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub layer_versions: BTreeMap<i64, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_id: Option<i64>,
    /// Last-observed remote publish state, kept as the raw wire string so
    /// states this build does not know still round-trip through the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Set when group creation failed; cleared when a retry succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The persisted unit of work. `id` equals the BDE Upload id it tracks and
/// never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Tool version that created this job file.
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, GroupState>,
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Denormalized copy of the Upload row as last observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bde_upload: Option<Upload>,
    #[serde(default)]
    pub has_import_errors: bool,
    #[serde(default)]
    pub has_publish_errors: bool,
    /// External support-ticket reference, set out-of-band.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zendesk_ticket: Option<String>,
}

impl Job {
    pub fn create(id: i64) -> Self {
        let now = Utc::now();
        let mut job = Job {
            id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: now,
            state: JobState::New,
            groups: BTreeMap::new(),
            changes: Vec::new(),
            last_update: None,
            bde_upload: None,
            has_import_errors: false,
            has_publish_errors: false,
            zendesk_ticket: None,
        };
        job.changes.push(ChangeEntry {
            at: now,
            state: JobState::New,
        });
        job
    }

    /// Set the job state, appending a change-log entry only when the value
    /// actually differs from the last logged one.
    pub fn set_state(&mut self, state: JobState) {
        self.state = state;
        let last = self.changes.last().map(|c| c.state);
        if last != Some(state) {
            self.changes.push(ChangeEntry {
                at: Utc::now(),
                state,
            });
        }
    }

    pub fn group_mut(&mut self, name: &str) -> &mut GroupState {
        self.groups.entry(name.to_string()).or_default()
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} ({}):", self.id, self.state)?;
        match serde_yaml::to_string(self) {
            Ok(yaml) => {
                for line in yaml.lines() {
                    writeln!(f, "  {line}")?;
                }
                Ok(())
            }
            Err(_) => writeln!(f, "  <unserializable>"),
        }
    }
}

/// Persistence port for jobs, keyed by integer id.
///
/// `load` returns `Ok(None)` for missing, empty or corrupt records; it only
/// errors on genuine I/O failure. `save` rewrites the record wholesale.
pub trait JobStore: Send + Sync {
    fn load(&self, id: i64) -> Result<Option<Job>>;
    fn save(&self, job: &Job) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_starts_new_with_one_change_entry() {
        let job = Job::create(9);
        assert_eq!(job.id, 9);
        assert_eq!(job.state, JobState::New);
        assert!(job.groups.is_empty());
        assert_eq!(job.changes.len(), 1);
        assert_eq!(job.changes[0].state, JobState::New);
    }

    #[test]
    fn set_state_appends_only_on_actual_change() {
        let mut job = Job::create(9);
        job.set_state(JobState::BdeRunning);
        assert_eq!(job.changes.len(), 2);

        // Same state again: no new entry.
        job.set_state(JobState::BdeRunning);
        assert_eq!(job.changes.len(), 2);

        job.set_state(JobState::BdeFinished);
        assert_eq!(job.changes.len(), 3);
        assert_eq!(job.changes.last().unwrap().state, JobState::BdeFinished);
    }

    #[test]
    fn job_round_trips_through_yaml() {
        let mut job = Job::create(123);
        job.set_state(JobState::Importing);
        let g = job.group_mut("hydro");
        g.layer_versions.insert(50001, 900);
        g.publish_id = Some(7);
        g.publish_state = Some("waiting-for-approval".to_string());

        let yaml = serde_yaml::to_string(&job).unwrap();
        let back: Job = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn unknown_publish_state_string_round_trips() {
        let mut job = Job::create(5);
        job.group_mut("g").publish_state = Some("quarantined".to_string());
        let yaml = serde_yaml::to_string(&job).unwrap();
        let back: Job = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            back.groups["g"].publish_state.as_deref(),
            Some("quarantined")
        );
    }
}
