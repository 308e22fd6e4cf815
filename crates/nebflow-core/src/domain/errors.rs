//! Errors - エラー型と分類
//!
//! - `StageError`: stage の開始に失敗（StageStartError）。run 全体が Failed になる
//! - `SinkError`: 通知の配送に失敗。run は継続し、件数だけ報告する
//! - `BuildError`: パイプライン構築時の検証エラー（Fail-fast）
//! - `ControllerError`: controller の操作エラー
//!
//! `terminate()` の競合（すでに終了したジョブへの terminate）はエラーではありません。

use std::path::PathBuf;

use thiserror::Error;

/// A stage failed to start, before producing a result or a job handle.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing prerequisite '{key}' ({})", path.display())]
    MissingPrerequisite { key: String, path: PathBuf },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}")]
    ExitStatus { program: String, status: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stage input: {0}")]
    Invalid(String),

    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// An `ObserverSink` did not accept a notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("observer channel is full")]
    Full,

    #[error("observer channel is closed")]
    Closed,
}

/// Pipeline construction error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("a pipeline needs at least one stage")]
    Empty,

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),
}

/// Controller operation error.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("a pipeline run is already active ({0})")]
    RunActive(String),

    #[error("no pipeline run is active")]
    NoActiveRun,

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Project(#[from] crate::project::ProjectError),
}
