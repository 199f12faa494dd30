use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Job lifecycle states. Wire strings match the persisted job files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[serde(rename = "new")]
    New,
    #[serde(rename = "bde-in-progress")]
    BdeRunning,
    #[serde(rename = "bde-error")]
    BdeError,
    #[serde(rename = "bde-finished")]
    BdeFinished,
    #[serde(rename = "importing")]
    Importing,
    #[serde(rename = "errors")]
    Errors,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "abandoned")]
    Abandoned,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::BdeRunning => "bde-in-progress",
            JobState::BdeError => "bde-error",
            JobState::BdeFinished => "bde-finished",
            JobState::Importing => "importing",
            JobState::Errors => "errors",
            JobState::Complete => "complete",
            JobState::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(JobState::New),
            "bde-in-progress" => Ok(JobState::BdeRunning),
            "bde-error" => Ok(JobState::BdeError),
            "bde-finished" => Ok(JobState::BdeFinished),
            "importing" => Ok(JobState::Importing),
            "errors" => Ok(JobState::Errors),
            "complete" => Ok(JobState::Complete),
            "abandoned" => Ok(JobState::Abandoned),
            other => Err(anyhow!("invalid job state: {}", other)),
        }
    }

    /// No defined transition leaves these states.
    pub fn is_hard_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Abandoned)
    }

    /// States from which `start_update` / continue-import may (re-)enter
    /// the import stage.
    pub fn can_start_update(&self) -> bool {
        matches!(self, JobState::BdeFinished | JobState::Errors)
    }

    /// States in which an error report is permitted.
    pub fn is_error_state(&self) -> bool {
        matches!(self, JobState::Errors | JobState::BdeError)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
