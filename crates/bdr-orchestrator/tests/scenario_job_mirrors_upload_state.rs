//! Scenario: job state mirrors the BDE Upload while the extract runs
//!
//! # Invariants under test
//!
//! 1. Upload status A/E/C maps to bde-in-progress / bde-error / bde-finished;
//!    U maps back to new.
//! 2. A state change is notified once; re-polling the same state appends no
//!    change-log entry and sends no further notification.
//! 3. Every pass persists the job with a fresh Upload snapshot.

mod common;

use std::collections::BTreeMap;

use bdr_job::{Job, JobState, UploadStatus};
use bdr_orchestrator::Orchestrator;
use bdr_verify::VerifyLevel;

use common::{test_config, upload, MemoryStore, RecordingNotifier, TestBde, TestPlatform};

#[tokio::test]
async fn upload_status_drives_job_state() {
    let cases = [
        (UploadStatus::Uninitialised, JobState::New),
        (UploadStatus::Active, JobState::BdeRunning),
        (UploadStatus::Completed, JobState::BdeFinished),
        (UploadStatus::Errored, JobState::BdeError),
    ];
    for (status, expected) in cases {
        let config = test_config(vec![], BTreeMap::new());
        let platform = TestPlatform::new();
        let bde = TestBde::default().with_upload(upload(1, status));
        let store = MemoryStore::default();
        let notify = RecordingNotifier::default();
        let orch = Orchestrator::new(&config, &platform, &bde, &store, &notify);

        let mut job = Job::create(1);
        orch.update_job(&mut job, None, VerifyLevel::All)
            .await
            .unwrap();

        assert_eq!(job.state, expected, "for upload status {status:?}");
        assert_eq!(job.bde_upload.as_ref().unwrap().status, status);
        assert!(store.jobs.lock().unwrap().contains_key(&1));
    }
}

#[tokio::test]
async fn repeated_polls_are_idempotent() {
    let config = test_config(vec![], BTreeMap::new());
    let platform = TestPlatform::new();
    let bde = TestBde::default().with_upload(upload(1, UploadStatus::Active));
    let store = MemoryStore::default();
    let notify = RecordingNotifier::default();
    let orch = Orchestrator::new(&config, &platform, &bde, &store, &notify);

    let mut job = Job::create(1);
    orch.update_job(&mut job, None, VerifyLevel::All)
        .await
        .unwrap();
    assert_eq!(job.state, JobState::BdeRunning);
    assert!(notify.contains("new -> bde-in-progress"));
    let changes_after_first = job.changes.len();
    let notifications_after_first = notify.messages().len();

    orch.update_job(&mut job, None, VerifyLevel::All)
        .await
        .unwrap();

    assert_eq!(job.state, JobState::BdeRunning);
    assert_eq!(job.changes.len(), changes_after_first);
    assert_eq!(notify.messages().len(), notifications_after_first);
}

#[tokio::test]
async fn missing_upload_row_is_an_error() {
    let config = test_config(vec![], BTreeMap::new());
    let platform = TestPlatform::new();
    let bde = TestBde::default();
    let store = MemoryStore::default();
    let notify = RecordingNotifier::default();
    let orch = Orchestrator::new(&config, &platform, &bde, &store, &notify);

    let mut job = Job::create(404);
    let err = orch
        .update_job(&mut job, None, VerifyLevel::All)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Upload 404 not found"));
}
