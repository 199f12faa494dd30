use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Remote publish states. The platform is an external collaborator and may
/// grow new values, so unrecognized strings land in `Unknown` instead of
/// failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishState {
    WaitingForTime,
    WaitingForItems,
    WaitingForApproval,
    Publishing,
    Cancelled,
    CancelledDueToError,
    Errored,
    Completed,
    Unknown(String),
}

impl PublishState {
    pub fn parse(s: &str) -> Self {
        match s {
            "waiting-for-time" => PublishState::WaitingForTime,
            "waiting-for-items" => PublishState::WaitingForItems,
            "waiting-for-approval" => PublishState::WaitingForApproval,
            "publishing" => PublishState::Publishing,
            "cancelled" => PublishState::Cancelled,
            "cancelled-due-to-error" => PublishState::CancelledDueToError,
            "errored" => PublishState::Errored,
            "completed" => PublishState::Completed,
            other => PublishState::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PublishState::WaitingForTime => "waiting-for-time",
            PublishState::WaitingForItems => "waiting-for-items",
            PublishState::WaitingForApproval => "waiting-for-approval",
            PublishState::Publishing => "publishing",
            PublishState::Cancelled => "cancelled",
            PublishState::CancelledDueToError => "cancelled-due-to-error",
            PublishState::Errored => "errored",
            PublishState::Completed => "completed",
            PublishState::Unknown(s) => s,
        }
    }

    /// Done in some way: nothing further will happen to this publish.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublishState::Cancelled
                | PublishState::CancelledDueToError
                | PublishState::Errored
                | PublishState::Completed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PublishState::Completed)
    }
}

impl std::fmt::Display for PublishState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PublishState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PublishState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PublishState::parse(&s))
    }
}

/// Remote publish: a transaction grouping layer versions for coordinated
/// release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publish {
    pub id: i64,
    pub state: PublishState,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One layer version attached to a publish draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishItem {
    pub layer_id: i64,
    pub version_id: i64,
}

/// Publish creation payload. bde-relay always uses a manual strategy so
/// nothing goes live before the consistency check approves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishDraft {
    pub reference: String,
    pub publish_strategy: String,
    pub error_strategy: String,
    pub items: Vec<PublishItem>,
}

impl PublishDraft {
    pub fn manual(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            publish_strategy: "manual".to_string(),
            error_strategy: "abort".to_string(),
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub latest_version: Option<i64>,
    #[serde(default)]
    pub published_version: Option<i64>,
}

impl Layer {
    /// A draft exists when the latest version has not been published.
    pub fn has_draft(&self) -> bool {
        self.latest_version != self.published_version
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub inserted: i64,
    pub updated: i64,
    pub deleted: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerVersion {
    pub id: i64,
    pub layer_id: i64,
    /// Extract-subsystem revision this version was imported from.
    #[serde(default)]
    pub source_revision: Option<i64>,
    #[serde(default)]
    pub feature_count: i64,
    #[serde(default)]
    pub change_summary: Option<ChangeSummary>,
    #[serde(default)]
    pub supplier_reference: Option<String>,
}

/// Platform API failures the orchestrator branches on. `RemoteState` marks
/// a remote arrangement this tool cannot reconcile (missing layer, version
/// history, conflicting import); `Conflict` a concurrent remote mutation.
#[derive(Debug)]
pub enum PlatformError {
    NotFound(String),
    Conflict(String),
    RemoteState(String),
    Api { status: u16, message: String },
    Transport(String),
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::NotFound(m) => write!(f, "not found: {m}"),
            PlatformError::Conflict(m) => write!(f, "conflict: {m}"),
            PlatformError::RemoteState(m) => write!(f, "remote state error: {m}"),
            PlatformError::Api { status, message } => {
                write!(f, "platform api error (http {status}): {message}")
            }
            PlatformError::Transport(m) => write!(f, "platform transport error: {m}"),
        }
    }
}

impl std::error::Error for PlatformError {}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Transport(e.to_string())
    }
}
