//! Job status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of one externally executing unit of work.
///
/// State transitions:
/// - NotStarted -> Running -> Finished
/// - NotStarted -> Running -> Failed
/// - NotStarted -> Failed (the work could not begin)
///
/// Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but the external work has not begun executing yet.
    NotStarted,

    /// The external work is executing.
    Running,

    /// The external work completed successfully.
    Finished,

    /// The external work exited unsuccessfully or was terminated.
    Failed,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Should the supervisor keep polling a handle in this state?
    ///
    /// `NotStarted` counts as in-flight: the handle exists, the work just
    /// has not been scheduled yet.
    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::not_started(JobStatus::NotStarted, false)]
    #[case::running(JobStatus::Running, false)]
    #[case::finished(JobStatus::Finished, true)]
    #[case::failed(JobStatus::Failed, true)]
    fn terminal_states(#[case] status: JobStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
        assert_eq!(status.is_pending(), !terminal);
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let s = serde_json::to_string(&JobStatus::NotStarted).unwrap();
        assert_eq!(s, "\"not_started\"");
    }
}
