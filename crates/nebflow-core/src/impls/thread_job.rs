//! ThreadJob - 専用 OS スレッドで長い計算を走らせる JobHandle
//!
//! プロセス内の計算は強制終了できないので、`terminate()` は
//! 協調的なフラグ（CancelFlag）を立てるだけです。クロージャは
//! 区切りのよいところで `is_raised()` を確認して戻ります。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::domain::{JobId, JobStatus, StageError};
use crate::ports::JobHandle;

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const FAILED: u8 = 3;

/// Cooperative cancel flag observed by the closure.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    reason: Mutex<Option<String>>,
}

impl Shared {
    fn settle(&self, status: u8, reason: Option<String>) {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner) = reason;
        self.state.store(status, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct ThreadJob {
    id: JobId,
    cancel: CancelFlag,
    shared: Arc<Shared>,
}

impl ThreadJob {
    /// Run `work` on a new named thread and return its handle immediately.
    ///
    /// The closure's `Err` (or a panic) settles the job to `Failed`; an `Ok`
    /// after the flag was raised also counts as `Failed` ("terminated").
    pub fn spawn<F>(id: JobId, name: &str, work: F) -> Result<Self, StageError>
    where
        F: FnOnce(&CancelFlag) -> Result<(), StageError> + Send + 'static,
    {
        let cancel = CancelFlag::default();
        let shared = Arc::new(Shared::default());

        let thread_cancel = cancel.clone();
        let thread_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name(format!("nebflow-{name}"))
            .spawn(move || {
                thread_shared.state.store(RUNNING, Ordering::Release);
                let result = catch_unwind(AssertUnwindSafe(|| work(&thread_cancel)));
                match result {
                    Ok(Ok(())) if thread_cancel.is_raised() => {
                        thread_shared.settle(FAILED, Some("terminated".to_string()));
                    }
                    Ok(Ok(())) => thread_shared.settle(FINISHED, None),
                    Ok(Err(e)) => thread_shared.settle(FAILED, Some(e.to_string())),
                    Err(panic) => {
                        let msg = panic_message(panic.as_ref());
                        warn!(job_id = %id, panic = %msg, "thread job panicked");
                        thread_shared.settle(FAILED, Some(StageError::Panicked(msg).to_string()));
                    }
                }
            })
            .map_err(|source| StageError::Spawn {
                program: name.to_string(),
                source,
            })?;

        debug!(job_id = %id, name, "thread job spawned");
        Ok(Self { id, cancel, shared })
    }
}

impl JobHandle for ThreadJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn status(&self) -> JobStatus {
        match self.shared.state.load(Ordering::Acquire) {
            NOT_STARTED => JobStatus::NotStarted,
            RUNNING => JobStatus::Running,
            FINISHED => JobStatus::Finished,
            _ => JobStatus::Failed,
        }
    }

    fn terminate(&self) {
        if self.status().is_terminal() {
            return;
        }
        self.cancel.raise();
    }

    fn failure_reason(&self) -> Option<String> {
        self.shared
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub(crate) fn panic_error(panic: &(dyn std::any::Any + Send)) -> StageError {
    StageError::Panicked(panic_message(panic))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
