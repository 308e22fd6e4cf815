//! Cancel - 単調なキャンセルフラグ
//!
//! `watch` チャネルで controller 側（CancelRequest）から
//! supervisor 側（CancelSignal）へ一方向に伝えます。
//! 一度 true になったら false には戻りません。

use std::sync::Arc;

use tokio::sync::watch;

/// Create a connected request/signal pair, initially not cancelled.
pub fn cancel_pair() -> (CancelRequest, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelRequest { tx: Arc::new(tx) }, CancelSignal { rx })
}

/// Controller side: raises the flag.
#[derive(Debug, Clone)]
pub struct CancelRequest {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelRequest {
    /// Raise the flag. Returns immediately; repeated calls are no-ops.
    pub fn request(&self) {
        // receivers may already be dropped; send_if_modified still stores the value
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Supervisor side: observes the flag at checkpoints and wakes sleeps.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    ///
    /// If every `CancelRequest` is dropped without requesting, this never
    /// resolves: nobody is left who could cancel.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn flag_is_monotonic() {
        let (req, signal) = cancel_pair();
        assert!(!signal.is_requested());

        req.request();
        req.request();
        assert!(signal.is_requested());
        assert!(req.is_requested());
    }

    #[tokio::test]
    async fn cancelled_wakes_a_waiter() {
        let (req, mut signal) = cancel_pair();

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            signal.is_requested()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        req.request();

        let seen = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(seen);
    }

    #[tokio::test]
    async fn cancelled_pends_when_requester_is_gone() {
        let (req, mut signal) = cancel_pair();
        drop(req);

        let res = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(res.is_err());
    }
}
