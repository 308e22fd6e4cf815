//! JobHandle port - 外部で実行中の 1 単位の仕事へのハンドル
//!
//! サブプロセスでも別スレッドの長い計算でも、supervisor からは
//! `status()` と `terminate()` しか見えません。

use crate::domain::{JobId, JobStatus};

/// Non-blocking status/cancellation interface to one externally executing
/// unit of work.
///
/// # Contract
/// - `status()` never blocks and is safe to call repeatedly. It may reap a
///   finished external resource as a side effect.
/// - `terminate()` never blocks and is idempotent. On a handle that is
///   already `Finished` or `Failed` it does nothing.
/// - After `terminate()`, `status()` must leave `Running` within a bounded
///   number of polls. The supervisor logs a handle that does not.
/// - Cleaning up on-disk artifacts is the stage's job, not the handle's.
pub trait JobHandle: Send + Sync {
    fn id(&self) -> JobId;

    fn status(&self) -> JobStatus;

    fn terminate(&self);

    /// Human-readable reason once `status()` reports `Failed`.
    fn failure_reason(&self) -> Option<String> {
        None
    }
}

impl std::fmt::Debug for dyn JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}
