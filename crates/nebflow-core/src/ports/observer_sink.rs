//! ObserverSink port - Supervisor からの通知の受け口
//!
//! Supervisor は controller とは別の実行コンテキストで動きます。
//! sink の実装は通知を必要なコンテキストへ運ぶ責任を持ち、
//! supervisor を長くブロックしてはいけません。

use crate::domain::{PipelineEvent, SinkError};

/// Notification surface used by the supervisor.
///
/// `deliver` must return promptly: a slow sink stalls the pipeline.
/// A failed delivery is logged and counted; it never aborts the run.
pub trait ObserverSink: Send + Sync {
    fn deliver(&self, event: PipelineEvent) -> Result<(), SinkError>;
}

impl<S: ObserverSink + ?Sized> ObserverSink for std::sync::Arc<S> {
    fn deliver(&self, event: PipelineEvent) -> Result<(), SinkError> {
        (**self).deliver(event)
    }
}
