//! bdr-verify
//!
//! Consistency verifier: before a publish is approved, prove that what the
//! platform is about to release matches the authoritative extract. Feature
//! counts are compared at the new version's source revision, and (at the
//! full level) insert/update/delete counts between the previous and new
//! revisions. Failures are collected per layer and raised together.

use std::collections::BTreeMap;

use anyhow::anyhow;
use tracing::{debug, info};

use bdr_bde::{BdeSource, ChangeCounts};
use bdr_platform::{ChangeSummary, PlatformApi, PlatformError};

/// How much verification to run before approving a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyLevel {
    /// Feature counts and change counts.
    All,
    /// Feature counts only.
    Counts,
    /// No verification; approve unchecked.
    None,
}

impl VerifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyLevel::All => "all",
            VerifyLevel::Counts => "counts",
            VerifyLevel::None => "none",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(VerifyLevel::All),
            "counts" => Ok(VerifyLevel::Counts),
            "none" => Ok(VerifyLevel::None),
            other => Err(anyhow!(
                "invalid verify level '{}'. expected one of: all | counts | none",
                other
            )),
        }
    }
}

/// One layer's mismatch between the extract and the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    FeatureCount {
        layer_id: i64,
        version_id: i64,
        table: String,
        source_revision: i64,
        authoritative: i64,
        reported: i64,
    },
    ChangeCounts {
        layer_id: i64,
        version_id: i64,
        table: String,
        authoritative: ChangeCounts,
        reported: ChangeSummary,
    },
}

impl std::fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyIssue::FeatureCount {
                layer_id,
                version_id,
                table,
                source_revision,
                authoritative,
                reported,
            } => write!(
                f,
                "version {version_id}/{table} (rev {source_revision}) reports {reported} \
                 features, BDE has {authoritative} (layer {layer_id})"
            ),
            ConsistencyIssue::ChangeCounts {
                layer_id,
                version_id,
                table,
                authoritative,
                reported,
            } => write!(
                f,
                "version {version_id}/{table} reports I{}/U{}/D{} changes, BDE has {} \
                 (layer {layer_id})",
                reported.inserted, reported.updated, reported.deleted, authoritative
            ),
        }
    }
}

/// Verifier failure modes. `Consistency` aggregates every mismatching layer
/// in the group; `RemoteState` is an arrangement we cannot verify at all
/// (missing version history, no predecessor) and aborts the check.
#[derive(Debug)]
pub enum VerifyError {
    RemoteState(String),
    Consistency(Vec<ConsistencyIssue>),
    Failed(anyhow::Error),
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::RemoteState(m) => write!(f, "remote state error: {m}"),
            VerifyError::Consistency(issues) => {
                writeln!(f, "{} consistency error(s):", issues.len())?;
                for issue in issues {
                    writeln!(f, "  - {issue}")?;
                }
                Ok(())
            }
            VerifyError::Failed(e) => write!(f, "verification failed: {e}"),
        }
    }
}

impl std::error::Error for VerifyError {}

impl From<PlatformError> for VerifyError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::NotFound(m) | PlatformError::RemoteState(m) => {
                VerifyError::RemoteState(m)
            }
            other => VerifyError::Failed(anyhow!(other)),
        }
    }
}

impl From<anyhow::Error> for VerifyError {
    fn from(e: anyhow::Error) -> Self {
        VerifyError::Failed(e)
    }
}

/// Verify every layer version in a group. All per-layer mismatches are
/// collected and raised together; a group passes only if every layer does.
pub async fn verify_group(
    platform: &dyn PlatformApi,
    bde: &dyn BdeSource,
    tables: &BTreeMap<i64, String>,
    layer_versions: &BTreeMap<i64, i64>,
    level: VerifyLevel,
) -> Result<(), VerifyError> {
    if level == VerifyLevel::None {
        return Ok(());
    }

    let mut issues = Vec::new();
    let total = layer_versions.len();
    for (i, (&layer_id, &version_id)) in layer_versions.iter().enumerate() {
        let table = tables.get(&layer_id).ok_or_else(|| {
            VerifyError::Failed(anyhow!("no table mapping for layer {layer_id}"))
        })?;
        verify_layer(platform, bde, layer_id, version_id, table, level, &mut issues).await?;
        info!(layer_id, "verified {}/{}", i + 1, total);
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(VerifyError::Consistency(issues))
    }
}

/// Verify a single layer version, appending any mismatches to `issues`.
async fn verify_layer(
    platform: &dyn PlatformApi,
    bde: &dyn BdeSource,
    layer_id: i64,
    version_id: i64,
    table: &str,
    level: VerifyLevel,
    issues: &mut Vec<ConsistencyIssue>,
) -> Result<(), VerifyError> {
    // Locate the new version in the layer's history, ascending by id.
    let mut versions = platform.list_versions(layer_id).await?;
    versions.sort_by_key(|v| v.id);
    let idx = versions
        .iter()
        .position(|v| v.id == version_id)
        .ok_or_else(|| {
            VerifyError::RemoteState(format!(
                "version {version_id} not found in layer {layer_id} history"
            ))
        })?;
    if idx == 0 {
        return Err(VerifyError::RemoteState(format!(
            "version {version_id} of layer {layer_id} has no previous version"
        )));
    }

    let version = platform.get_version(layer_id, version_id).await?;
    let source_revision = version.source_revision.ok_or_else(|| {
        VerifyError::RemoteState(format!(
            "version {version_id} of layer {layer_id} has no source revision"
        ))
    })?;

    // Feature counts: always checked.
    let authoritative = bde.row_count(table, source_revision).await?;
    debug!(
        layer_id,
        table,
        expected = authoritative,
        actual = version.feature_count,
        "feature counts"
    );
    if authoritative != version.feature_count {
        issues.push(ConsistencyIssue::FeatureCount {
            layer_id,
            version_id,
            table: table.to_string(),
            source_revision,
            authoritative,
            reported: version.feature_count,
        });
    }

    if level != VerifyLevel::All {
        debug!(layer_id, "skipping insert/update/delete counts");
        return Ok(());
    }

    let prev_id = versions[idx - 1].id;
    let prev = platform.get_version(layer_id, prev_id).await?;
    let Some(prev_revision) = prev.source_revision else {
        // First tracked version: nothing to diff against.
        debug!(layer_id, "previous version has no source revision, skipping change counts");
        return Ok(());
    };

    let reported = version.change_summary.ok_or_else(|| {
        VerifyError::RemoteState(format!(
            "version {version_id} of layer {layer_id} has no change summary"
        ))
    })?;
    let authoritative = bde
        .change_counts(table, prev_revision, source_revision)
        .await?;
    debug!(layer_id, table, expected = %authoritative, "change counts");

    if reported.inserted != authoritative.inserted
        || reported.updated != authoritative.updated
        || reported.deleted != authoritative.deleted
    {
        issues.push(ConsistencyIssue::ChangeCounts {
            layer_id,
            version_id,
            table: table.to_string(),
            authoritative,
            reported,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_level_parses_case_insensitively() {
        assert_eq!(VerifyLevel::parse("ALL").unwrap(), VerifyLevel::All);
        assert_eq!(VerifyLevel::parse("counts").unwrap(), VerifyLevel::Counts);
        assert_eq!(VerifyLevel::parse(" none ").unwrap(), VerifyLevel::None);
        assert!(VerifyLevel::parse("full").is_err());
    }

    #[test]
    fn issue_display_names_the_layer_and_counts() {
        let issue = ConsistencyIssue::FeatureCount {
            layer_id: 50001,
            version_id: 900,
            table: "bde.crs_parcel".to_string(),
            source_revision: 12,
            authoritative: 100,
            reported: 99,
        };
        let text = issue.to_string();
        assert!(text.contains("900"));
        assert!(text.contains("bde.crs_parcel"));
        assert!(text.contains("99"));
        assert!(text.contains("100"));
    }

    #[test]
    fn aggregated_display_lists_every_issue() {
        let err = VerifyError::Consistency(vec![
            ConsistencyIssue::FeatureCount {
                layer_id: 1,
                version_id: 10,
                table: "a.b".to_string(),
                source_revision: 1,
                authoritative: 2,
                reported: 3,
            },
            ConsistencyIssue::ChangeCounts {
                layer_id: 2,
                version_id: 20,
                table: "a.c".to_string(),
                authoritative: ChangeCounts {
                    inserted: 1,
                    updated: 0,
                    deleted: 0,
                },
                reported: ChangeSummary {
                    inserted: 2,
                    updated: 0,
                    deleted: 0,
                },
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("2 consistency error(s)"));
        assert!(text.contains("a.b"));
        assert!(text.contains("a.c"));
    }
}
