use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};

/// Exit code reported when the script never ran to completion.
pub const INFRA_FAILURE_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Idle,
    Pending,
    Running,
    Completed,
    Failed,
    Cancelling,
}

impl JobPhase {
    /// `Completed` and `Failed` never transition further for the same job.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Idle => write!(f, "idle"),
            JobPhase::Pending => write!(f, "pending"),
            JobPhase::Running => write!(f, "running"),
            JobPhase::Completed => write!(f, "completed"),
            JobPhase::Failed => write!(f, "failed"),
            JobPhase::Cancelling => write!(f, "cancelling"),
        }
    }
}

/// Snapshot of the single job slot.
///
/// The field names on the wire (`status`, `returncode`) are what the CI
/// runner hook polls for, so they differ from the Rust names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    #[serde(rename = "status")]
    pub phase: JobPhase,
    pub pid: Option<u32>,
    #[serde(rename = "returncode")]
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::idle()
    }
}

impl JobStatus {
    pub fn idle() -> Self {
        Self {
            id: String::new(),
            phase: JobPhase::Idle,
            pid: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: JobPhase::Pending,
            ..Self::idle()
        }
    }

    pub fn running(id: impl Into<String>, pid: u32) -> Self {
        Self {
            id: id.into(),
            phase: JobPhase::Running,
            pid: Some(pid),
            ..Self::idle()
        }
    }

    pub fn cancelling(id: impl Into<String>, pid: u32) -> Self {
        Self {
            id: id.into(),
            phase: JobPhase::Cancelling,
            pid: Some(pid),
            ..Self::idle()
        }
    }

    pub fn completed(id: impl Into<String>, pid: u32, exit_code: i32) -> Self {
        Self {
            id: id.into(),
            phase: JobPhase::Completed,
            pid: Some(pid),
            exit_code: Some(exit_code),
            error: None,
        }
    }

    /// Execution infrastructure failure. `pid` is only known when the
    /// failure happened after the child was spawned.
    pub fn failed(id: impl Into<String>, pid: Option<u32>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: JobPhase::Failed,
            pid,
            exit_code: Some(INFRA_FAILURE_EXIT_CODE),
            error: Some(error.into()),
        }
    }

    /// Response for a request that was refused without touching the job slot.
    ///
    /// Encoded like a spawn failure so clients treat every refusal alike.
    pub fn rejected(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::failed(id, None, error)
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Job ids are used as file names inside the logs directory.
pub fn validate_job_id(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(RunnerError::InvalidJobId(id.to_string()));
    }
    Ok(())
}
