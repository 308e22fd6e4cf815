//! Outcome model: how a PipelineRun ended, and why it failed.
//!
//! The terminal outcome is the only thing that crosses back from the
//! supervisor to the controller when a run ends. It is serializable so the
//! CLI can print a machine-readable report.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a PipelineRun.
///
/// `Pending` only exists while the run is being driven; a Terminal event
/// never carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Pending,
    Completed,
    Cancelled,
    Failed,
}

impl RunOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunOutcome::Pending)
    }

    pub fn is_success(self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Pending => "pending",
            RunOutcome::Completed => "completed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a run ended `Failed`.
///
/// Cancellation is never represented here: it has its own outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailure {
    /// The stage's `start`/`run` raised before producing a result or handle.
    StartError { stage: String, message: String },

    /// The stage's job handle settled to `Failed`.
    JobFailed {
        stage: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The optional per-stage deadline elapsed while the job was running.
    DeadlineExceeded { stage: String, elapsed_ms: u64 },
}

impl StageFailure {
    pub fn stage(&self) -> &str {
        match self {
            StageFailure::StartError { stage, .. }
            | StageFailure::JobFailed { stage, .. }
            | StageFailure::DeadlineExceeded { stage, .. } => stage,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageFailure::StartError { stage, message } => {
                write!(f, "stage '{stage}' could not start: {message}")
            }
            StageFailure::JobFailed { stage, reason } => match reason {
                Some(reason) => write!(f, "stage '{stage}' failed: {reason}"),
                None => write!(f, "stage '{stage}' failed"),
            },
            StageFailure::DeadlineExceeded { stage, elapsed_ms } => {
                write!(f, "stage '{stage}' exceeded its deadline after {elapsed_ms} ms")
            }
        }
    }
}
