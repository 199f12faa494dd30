//! bdr-config
//!
//! Layered YAML configuration for bde-relay. Later files override earlier
//! ones key-by-key; the merged document is validated before use so that a
//! contradictory group-to-layer mapping is fatal at startup, never during a
//! reconciliation pass.

mod schedule;

pub use schedule::{schedule_matches_on, schedule_matches_today};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Env var naming an explicit config file (overrides the search path).
pub const ENV_CONFIG: &str = "BDR_CONFIG";

/// Default config locations, probed in order.
pub const DEFAULT_PATHS: &[&str] = &["/etc/bde-relay/config.yml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Debug mode: schedules are bypassed, group errors re-raise, reports
    /// are logged instead of sent.
    #[serde(default)]
    pub debug: bool,

    /// Directory holding one YAML job file per job id.
    pub job_path: PathBuf,

    /// Advisory lock file path; defaults to bde-relay.lock in the temp dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_path: Option<PathBuf>,

    pub bde: BdeConfig,
    pub platform: PlatformConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BdeConfig {
    /// layer id -> fully-qualified staging table (`schema.table`).
    pub tables: BTreeMap<i64, String>,
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    /// Ordered layer ids imported and published together.
    pub layers: Vec<i64>,
    /// RFC 5545 RRULE; absent or `"*"` matches every day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Publishing platform site, e.g. `https://data.example.com`.
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Chat webhook URL; when absent, notifications go to the log only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Appended to report subjects, e.g. a site short-name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_prefix: Option<String>,
}

impl Config {
    pub fn lock_path(&self) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("bde-relay.lock"))
    }
}

/// Resolve the config file: explicit CLI path, then $BDR_CONFIG, then the
/// default search path.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(p) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(p));
    }
    for p in DEFAULT_PATHS {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(pb);
        }
    }
    bail!("CONFIG_NOT_FOUND: no config file given and none of {DEFAULT_PATHS:?} exist");
}

/// Load and validate a layered config. Paths merge in order: earlier files
/// are base, later files override.
pub fn load_layered(paths: &[&Path]) -> Result<Config> {
    let mut docs = Vec::new();
    for p in paths {
        let raw = fs::read_to_string(p)
            .with_context(|| format!("failed to read config file {}", p.display()))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_from_strings(&doc_refs)
}

pub fn load_layered_from_strings(yaml_docs: &[&str]) -> Result<Config> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = yaml_to_json(v_yaml)?;
        merged = deep_merge(merged, v_json);
    }

    let config: Config =
        serde_json::from_value(merged).context("config does not match expected shape")?;
    validate(&config)?;
    Ok(config)
}

/// YAML mappings may use integer keys (layer ids); JSON objects cannot.
/// Stringify scalar keys so the merged document stays a plain JSON object.
fn yaml_to_json(v: serde_yaml::Value) -> Result<Value> {
    use serde_yaml::Value as Y;
    Ok(match v {
        Y::Null => Value::Null,
        Y::Bool(b) => Value::Bool(b),
        Y::Number(n) => serde_json::to_value(n).context("yaml number conversion failed")?,
        Y::String(s) => Value::String(s),
        Y::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                out.push(yaml_to_json(item)?);
            }
            Value::Array(out)
        }
        Y::Mapping(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, val) in map {
                let key = match k {
                    Y::String(s) => s,
                    Y::Number(n) => n.to_string(),
                    Y::Bool(b) => b.to_string(),
                    other => bail!("unsupported yaml mapping key: {:?}", other),
                };
                out.insert(key, yaml_to_json(val)?);
            }
            Value::Object(out)
        }
        Y::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

/// Cross-check the layer/table/group mapping. Any inconsistency here is a
/// configuration error: fatal at startup, never retried.
fn validate(config: &Config) -> Result<()> {
    let mut group_names: BTreeSet<&str> = BTreeSet::new();
    for g in &config.bde.groups {
        if g.name.trim().is_empty() {
            bail!("CONFIG_EMPTY_GROUP_NAME");
        }
        if !group_names.insert(g.name.as_str()) {
            bail!("CONFIG_DUPLICATE_GROUP: {}", g.name);
        }
    }

    let mapped: BTreeSet<i64> = config.bde.tables.keys().copied().collect();

    let mut published: BTreeSet<i64> = BTreeSet::new();
    let mut dupes: BTreeSet<i64> = BTreeSet::new();
    for g in &config.bde.groups {
        for layer in &g.layers {
            if !published.insert(*layer) {
                dupes.insert(*layer);
            }
        }
    }
    if !dupes.is_empty() {
        bail!(
            "CONFIG_DUPLICATE_LAYER: layers repeated across bde.groups: {:?}",
            dupes
        );
    }

    let mapped_extra: Vec<i64> = mapped.difference(&published).copied().collect();
    if !mapped_extra.is_empty() {
        bail!(
            "CONFIG_UNPUBLISHED_LAYER: layers in bde.tables missing from bde.groups: {:?}",
            mapped_extra
        );
    }

    let published_extra: Vec<i64> = published.difference(&mapped).copied().collect();
    if !published_extra.is_empty() {
        bail!(
            "CONFIG_UNMAPPED_LAYER: layers in bde.groups missing from bde.tables: {:?}",
            published_extra
        );
    }

    Ok(())
}
