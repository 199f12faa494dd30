//! bdr-job
//!
//! The persisted unit of work: a `Job` tracks one BDE Upload through
//! import, publish and verification on the publishing platform. Pure data
//! plus invariant checks; all I/O lives behind the [`JobStore`] port.

mod job;
mod state;
mod upload;

pub use job::{ChangeEntry, GroupState, Job, JobStore};
pub use state::JobState;
pub use upload::{Upload, UploadStatus};

/// Major-version-scoped reference for one job, e.g. `bdr2_1234`.
///
/// The major version is part of the reference so that a redeployed tool
/// with incompatible semantics never adopts an old job's remote artifacts.
pub fn job_reference(job_id: i64) -> String {
    format!("bdr{}_{}", env!("CARGO_PKG_VERSION_MAJOR"), job_id)
}

/// Idempotency reference for one publish group within a job,
/// e.g. `bdr2_1234:hydro`. Stable across re-runs of the same job.
pub fn group_reference(job_id: i64, group_name: &str) -> String {
    format!("{}:{}", job_reference(job_id), group_name)
}
