use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a BDE Upload run, as stored in the extract subsystem's
/// control table (single-character codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "U")]
    Uninitialised,
    #[serde(rename = "A")]
    Active,
    #[serde(rename = "C")]
    Completed,
    #[serde(rename = "E")]
    Errored,
}

impl UploadStatus {
    pub fn as_code(&self) -> &'static str {
        match self {
            UploadStatus::Uninitialised => "U",
            UploadStatus::Active => "A",
            UploadStatus::Completed => "C",
            UploadStatus::Errored => "E",
        }
    }

    pub fn parse(code: &str) -> Result<Self> {
        match code {
            "U" => Ok(UploadStatus::Uninitialised),
            "A" => Ok(UploadStatus::Active),
            "C" => Ok(UploadStatus::Completed),
            "E" => Ok(UploadStatus::Errored),
            other => Err(anyhow!("invalid upload status code: {:?}", other)),
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            UploadStatus::Uninitialised => "Uninitialised",
            UploadStatus::Active => "Active",
            UploadStatus::Completed => "Completed Successfully",
            UploadStatus::Errored => "Completed with Errors",
        }
    }
}

/// Snapshot of one row of the extract subsystem's control table.
///
/// The extract subsystem owns these rows; bde-relay only reads them and
/// keeps a denormalized copy on the Job (`error_reason` is bde-relay's own
/// annotation, set when the extract side reports a failure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub status: UploadStatus,
    pub schema_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl std::fmt::Display for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.status.display())
    }
}
