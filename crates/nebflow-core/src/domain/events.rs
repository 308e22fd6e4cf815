//! Events - Supervisor からコントローラへの通知
//!
//! Supervisor と controller の間で共有される状態はありません。
//! 進捗・完了・終了はすべてこのイベントとして配送されます。

use super::outcome::{RunOutcome, StageFailure};

/// Notification delivered through an `ObserverSink`.
///
/// Ordering per run:
/// - `Tick`s for one stage arrive in time order, before that stage's `StageComplete`
/// - exactly one `StageComplete` per successfully finished stage
/// - exactly one `Terminal`, always last
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// One poll of a pollable stage found its job still running.
    Tick { stage: String },

    /// A stage finished successfully.
    StageComplete { stage: String },

    /// The run reached its terminal outcome.
    Terminal {
        outcome: RunOutcome,
        failure: Option<StageFailure>,
    },
}

impl PipelineEvent {
    pub fn tick(stage: impl Into<String>) -> Self {
        Self::Tick {
            stage: stage.into(),
        }
    }

    pub fn stage_complete(stage: impl Into<String>) -> Self {
        Self::StageComplete {
            stage: stage.into(),
        }
    }

    pub fn terminal(outcome: RunOutcome) -> Self {
        Self::Terminal {
            outcome,
            failure: None,
        }
    }

    pub fn failed(failure: StageFailure) -> Self {
        Self::Terminal {
            outcome: RunOutcome::Failed,
            failure: Some(failure),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Terminal { .. })
    }

    /// Stage this event refers to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineEvent::Tick { stage } | PipelineEvent::StageComplete { stage } => Some(stage),
            PipelineEvent::Terminal { .. } => None,
        }
    }
}
