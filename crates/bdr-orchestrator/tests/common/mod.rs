#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use bdr_bde::{BdeSource, ChangeCounts};
use bdr_config::{BdeConfig, Config, GroupConfig, NotifyConfig, PlatformConfig};
use bdr_job::{Job, JobStore, Upload, UploadStatus};
use bdr_notify::{Notifier, Severity};
use bdr_platform::{
    Layer, LayerVersion, PlatformApi, PlatformError, Publish, PublishDraft, PublishState,
};

// ---------------------------------------------------------------------------
// config + fixtures
// ---------------------------------------------------------------------------

pub fn test_config(groups: Vec<GroupConfig>, tables: BTreeMap<i64, String>) -> Config {
    Config {
        debug: false,
        job_path: PathBuf::from("/nonexistent"),
        lock_path: None,
        bde: BdeConfig { tables, groups },
        platform: PlatformConfig {
            endpoint: "https://example.test".to_string(),
        },
        notify: NotifyConfig::default(),
    }
}

pub fn group(name: &str, layers: &[i64]) -> GroupConfig {
    GroupConfig {
        name: name.to_string(),
        layers: layers.to_vec(),
        schedule: None,
    }
}

pub fn upload(id: i64, status: UploadStatus) -> Upload {
    Upload {
        id,
        status,
        schema_name: "bde".to_string(),
        start_time: None,
        end_time: None,
        error_reason: None,
    }
}

// ---------------------------------------------------------------------------
// scriptable platform fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PlatformState {
    pub publishes: BTreeMap<i64, Publish>,
    pub layers: BTreeMap<i64, Layer>,
    /// layer id -> current draft version
    pub drafts: BTreeMap<i64, LayerVersion>,
    /// layer id -> full version history
    pub versions: BTreeMap<i64, Vec<LayerVersion>>,
    pub created: Vec<PublishDraft>,
    pub approved: Vec<i64>,
    pub cancelled: Vec<i64>,
    pub cancel_conflicts: BTreeSet<i64>,
    pub import_conflicts: BTreeSet<i64>,
    pub next_publish_id: i64,
    pub next_version_id: i64,
}

pub struct TestPlatform {
    pub state: Mutex<PlatformState>,
}

impl TestPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState {
                next_publish_id: 500,
                next_version_id: 9000,
                ..PlatformState::default()
            }),
        }
    }

    /// A published layer with no draft outstanding.
    pub fn add_layer(&self, layer_id: i64) {
        let mut st = self.state.lock().unwrap();
        st.layers.insert(
            layer_id,
            Layer {
                id: layer_id,
                title: format!("layer {layer_id}"),
                latest_version: Some(1),
                published_version: Some(1),
            },
        );
        st.versions.entry(layer_id).or_default().push(LayerVersion {
            id: 1,
            layer_id,
            source_revision: None,
            feature_count: 0,
            change_summary: None,
            supplier_reference: None,
        });
    }

    pub fn add_publish(&self, id: i64, reference: &str, state: PublishState) {
        self.state.lock().unwrap().publishes.insert(
            id,
            Publish {
                id,
                state,
                reference: Some(reference.to_string()),
                created_at: None,
            },
        );
    }

    pub fn set_publish_state(&self, id: i64, state: PublishState) {
        if let Some(p) = self.state.lock().unwrap().publishes.get_mut(&id) {
            p.state = state;
        }
    }
}

#[async_trait]
impl PlatformApi for TestPlatform {
    async fn list_publishes(&self, reference: &str) -> Result<Vec<Publish>, PlatformError> {
        let st = self.state.lock().unwrap();
        Ok(st
            .publishes
            .values()
            .filter(|p| p.reference.as_deref() == Some(reference))
            .cloned()
            .collect())
    }

    async fn get_publish(&self, id: i64) -> Result<Publish, PlatformError> {
        self.state
            .lock()
            .unwrap()
            .publishes
            .get(&id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("publish {id}")))
    }

    async fn create_publish(&self, draft: &PublishDraft) -> Result<Publish, PlatformError> {
        let mut st = self.state.lock().unwrap();
        st.created.push(draft.clone());
        st.next_publish_id += 1;
        let publish = Publish {
            id: st.next_publish_id,
            state: PublishState::WaitingForItems,
            reference: Some(draft.reference.clone()),
            created_at: None,
        };
        st.publishes.insert(publish.id, publish.clone());
        Ok(publish)
    }

    async fn cancel_publish(&self, id: i64) -> Result<(), PlatformError> {
        let mut st = self.state.lock().unwrap();
        if st.cancel_conflicts.contains(&id) {
            return Err(PlatformError::Conflict(format!(
                "publish {id} is no longer cancellable"
            )));
        }
        if let Some(p) = st.publishes.get_mut(&id) {
            p.state = PublishState::Cancelled;
        }
        st.cancelled.push(id);
        Ok(())
    }

    async fn approve_publish(&self, id: i64) -> Result<(), PlatformError> {
        let mut st = self.state.lock().unwrap();
        st.approved.push(id);
        if let Some(p) = st.publishes.get_mut(&id) {
            p.state = PublishState::Publishing;
        }
        Ok(())
    }

    async fn get_layer(&self, layer_id: i64) -> Result<Layer, PlatformError> {
        self.state
            .lock()
            .unwrap()
            .layers
            .get(&layer_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("layer {layer_id}")))
    }

    async fn get_draft_version(&self, layer_id: i64) -> Result<LayerVersion, PlatformError> {
        self.state
            .lock()
            .unwrap()
            .drafts
            .get(&layer_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("draft of layer {layer_id}")))
    }

    async fn create_draft_version(
        &self,
        layer_id: i64,
        supplier_reference: &str,
    ) -> Result<LayerVersion, PlatformError> {
        let mut st = self.state.lock().unwrap();
        st.next_version_id += 1;
        let version = LayerVersion {
            id: st.next_version_id,
            layer_id,
            source_revision: None,
            feature_count: 0,
            change_summary: None,
            supplier_reference: Some(supplier_reference.to_string()),
        };
        st.drafts.insert(layer_id, version.clone());
        st.versions.entry(layer_id).or_default().push(version.clone());
        if let Some(layer) = st.layers.get_mut(&layer_id) {
            layer.latest_version = Some(version.id);
        }
        Ok(version)
    }

    async fn set_supplier_reference(
        &self,
        layer_id: i64,
        version_id: i64,
        supplier_reference: &str,
    ) -> Result<LayerVersion, PlatformError> {
        let mut st = self.state.lock().unwrap();
        let draft = st
            .drafts
            .get_mut(&layer_id)
            .filter(|v| v.id == version_id)
            .ok_or_else(|| PlatformError::NotFound(format!("draft of layer {layer_id}")))?;
        draft.supplier_reference = Some(supplier_reference.to_string());
        Ok(draft.clone())
    }

    async fn start_import(
        &self,
        layer_id: i64,
        version_id: i64,
    ) -> Result<LayerVersion, PlatformError> {
        let st = self.state.lock().unwrap();
        if st.import_conflicts.contains(&layer_id) {
            return Err(PlatformError::Conflict(format!(
                "layer {layer_id} import already running"
            )));
        }
        st.versions
            .get(&layer_id)
            .and_then(|vs| vs.iter().find(|v| v.id == version_id))
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("version {version_id}")))
    }

    async fn list_versions(&self, layer_id: i64) -> Result<Vec<LayerVersion>, PlatformError> {
        self.state
            .lock()
            .unwrap()
            .versions
            .get(&layer_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("layer {layer_id}")))
    }

    async fn get_version(
        &self,
        layer_id: i64,
        version_id: i64,
    ) -> Result<LayerVersion, PlatformError> {
        self.state
            .lock()
            .unwrap()
            .versions
            .get(&layer_id)
            .and_then(|vs| vs.iter().find(|v| v.id == version_id))
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("version {version_id}")))
    }
}

// ---------------------------------------------------------------------------
// extract-side fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TestBde {
    pub uploads: Mutex<BTreeMap<i64, Upload>>,
    pub row_counts: Mutex<BTreeMap<(String, i64), i64>>,
    pub change_counts: Mutex<BTreeMap<(String, i64, i64), ChangeCounts>>,
}

impl TestBde {
    pub fn with_upload(self, u: Upload) -> Self {
        self.uploads.lock().unwrap().insert(u.id, u);
        self
    }

    pub fn set_upload(&self, u: Upload) {
        self.uploads.lock().unwrap().insert(u.id, u);
    }

    pub fn set_row_count(&self, table: &str, rev: i64, count: i64) {
        self.row_counts
            .lock()
            .unwrap()
            .insert((table.to_string(), rev), count);
    }
}

#[async_trait]
impl BdeSource for TestBde {
    async fn upload(&self, id: i64) -> anyhow::Result<Option<Upload>> {
        Ok(self.uploads.lock().unwrap().get(&id).cloned())
    }

    async fn latest_upload(&self) -> anyhow::Result<Option<Upload>> {
        Ok(self
            .uploads
            .lock()
            .unwrap()
            .values()
            .max_by_key(|u| u.id)
            .cloned())
    }

    async fn active_upload(&self) -> anyhow::Result<Option<Upload>> {
        Ok(self
            .uploads
            .lock()
            .unwrap()
            .values()
            .filter(|u| u.status == UploadStatus::Active)
            .max_by_key(|u| u.id)
            .cloned())
    }

    async fn row_count(&self, table: &str, rev: i64) -> anyhow::Result<i64> {
        self.row_counts
            .lock()
            .unwrap()
            .get(&(table.to_string(), rev))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no row count scripted for {table}@{rev}"))
    }

    async fn change_counts(
        &self,
        table: &str,
        rev_from: i64,
        rev_to: i64,
    ) -> anyhow::Result<ChangeCounts> {
        self.change_counts
            .lock()
            .unwrap()
            .get(&(table.to_string(), rev_from, rev_to))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no change counts scripted for {table}"))
    }
}

// ---------------------------------------------------------------------------
// in-memory job store + recording notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    pub jobs: Mutex<BTreeMap<i64, Job>>,
    pub saves: Mutex<u32>,
}

impl JobStore for MemoryStore {
    fn load(&self, id: i64) -> anyhow::Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    fn save(&self, job: &Job) -> anyhow::Result<()> {
        *self.saves.lock().unwrap() += 1;
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages()
            .iter()
            .any(|(_, m)| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, severity: Severity, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((severity, message.to_string()));
    }
}
