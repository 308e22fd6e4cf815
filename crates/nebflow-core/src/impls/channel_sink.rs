//! ChannelSink - bounded mpsc による ObserverSink 実装
//!
//! # 実装詳細
//! - `try_send` なので supervisor は決してブロックしない
//! - 満杯なら SinkError::Full、受信側が drop 済みなら SinkError::Closed
//! - 受信側（controller）は自分のコンテキストで 1 件ずつ適用する

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::domain::{PipelineEvent, SinkError};
use crate::ports::ObserverSink;

/// Receiving half handed to the controller.
pub type EventReceiver = mpsc::Receiver<PipelineEvent>;

/// Create a bounded event channel.
pub fn event_channel(capacity: usize) -> (ChannelSink, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl ObserverSink for ChannelSink {
    fn deliver(&self, event: PipelineEvent) -> Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let (sink, mut rx) = event_channel(8);
        sink.deliver(PipelineEvent::tick("a")).unwrap();
        sink.deliver(PipelineEvent::stage_complete("a")).unwrap();

        assert_eq!(rx.recv().await, Some(PipelineEvent::tick("a")));
        assert_eq!(rx.recv().await, Some(PipelineEvent::stage_complete("a")));
    }

    #[test]
    fn full_channel_is_reported_without_blocking() {
        let (sink, _rx) = event_channel(1);
        sink.deliver(PipelineEvent::tick("a")).unwrap();

        let err = sink.deliver(PipelineEvent::tick("a")).unwrap_err();
        assert_eq!(err, SinkError::Full);
    }

    #[test]
    fn dropped_receiver_is_reported_as_closed() {
        let (sink, rx) = event_channel(4);
        drop(rx);

        let err = sink.deliver(PipelineEvent::tick("a")).unwrap_err();
        assert_eq!(err, SinkError::Closed);
    }
}
