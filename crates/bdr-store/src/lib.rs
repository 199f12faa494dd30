//! bdr-store
//!
//! Filesystem persistence: one YAML file per job, plus the advisory lock
//! that keeps concurrent runs from stepping on each other's state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{debug, warn};

use bdr_job::{Job, JobStore};

/// Job files live in one directory as `{id}.yml` and are rewritten
/// wholesale on every save.
pub struct FileJobStore {
    job_path: PathBuf,
}

impl FileJobStore {
    pub fn new(job_path: impl Into<PathBuf>) -> Self {
        Self {
            job_path: job_path.into(),
        }
    }

    fn file_for(&self, id: i64) -> PathBuf {
        self.job_path.join(format!("{id}.yml"))
    }
}

impl JobStore for FileJobStore {
    /// An unreadable or corrupt file is treated the same as a missing one:
    /// the job is reported absent and a warning is logged. A fresh run can
    /// then recreate it from the Upload row.
    fn load(&self, id: i64) -> Result<Option<Job>> {
        let path = self.file_for(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        let job: Job = match serde_yaml::from_str(&raw) {
            Ok(job) => job,
            Err(e) => {
                warn!("job file {} is unreadable, ignoring: {e}", path.display());
                return Ok(None);
            }
        };
        if job.id != id {
            warn!(
                "job file {} claims id {}, ignoring",
                path.display(),
                job.id
            );
            return Ok(None);
        }
        Ok(Some(job))
    }

    fn save(&self, job: &Job) -> Result<()> {
        fs::create_dir_all(&self.job_path)
            .with_context(|| format!("creating {}", self.job_path.display()))?;
        let path = self.file_for(job.id);
        let raw = serde_yaml::to_string(job).context("serializing job")?;
        fs::write(&path, raw).with_context(|| format!("writing {}", path.display()))?;
        debug!(job_id = job.id, "saved {}", path.display());
        Ok(())
    }
}

/// Exclusive advisory file lock held for the duration of a run. The lock
/// releases when dropped, or with the process if it dies first.
pub struct ProcessLock {
    file: fs::File,
    path: PathBuf,
}

impl ProcessLock {
    /// Take the lock, blocking when `wait` is set and failing fast
    /// otherwise.
    pub fn acquire(path: &Path, wait: bool) -> Result<Self> {
        let file = fs::File::create(path)
            .with_context(|| format!("creating lock file {}", path.display()))?;
        if wait {
            file.lock_exclusive()
                .with_context(|| format!("locking {}", path.display()))?;
        } else {
            file.try_lock_exclusive().with_context(|| {
                format!(
                    "another bde-relay process holds the lock at {}",
                    path.display()
                )
            })?;
        }
        debug!("acquired lock at {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!("releasing lock at {} failed: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use bdr_job::JobState;

    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());

        let mut job = Job::create(42);
        job.set_state(JobState::BdeRunning);
        job.group_mut("hydro").layer_versions.insert(50001, 900);
        store.save(&job).unwrap();

        let loaded = store.load(42).unwrap().unwrap();
        assert_eq!(loaded.id, 42);
        assert_eq!(loaded.state, JobState::BdeRunning);
        assert_eq!(loaded.groups["hydro"].layer_versions[&50001], 900);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        assert!(store.load(7).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("7.yml"), ":: not yaml {{{{").unwrap();
        let store = FileJobStore::new(dir.path());
        assert!(store.load(7).unwrap().is_none());
    }

    #[test]
    fn id_mismatch_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        store.save(&Job::create(8)).unwrap();
        std::fs::rename(dir.path().join("8.yml"), dir.path().join("9.yml")).unwrap();
        assert!(store.load(9).unwrap().is_none());
    }

    #[test]
    fn second_fail_fast_acquire_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let held = ProcessLock::acquire(&path, false).unwrap();
        assert!(ProcessLock::acquire(&path, false).is_err());
        drop(held);
        ProcessLock::acquire(&path, false).unwrap();
    }
}
