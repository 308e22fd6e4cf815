//! ProcessJob - サブプロセスを包む JobHandle
//!
//! # 実装詳細
//! - `status()` は `try_wait()` で非ブロッキングに終了を確認（終了していれば reap）
//! - `terminate()` は子プロセスが率いるプロセスグループ全体に SIGKILL を一度だけ送る。待たない
//!   （グループを持たない子には `start_kill()`）
//! - 終了状態はキャッシュするので、reap 後も同じ結果を返し続ける
//! - 実行中のまま drop されたハンドルも同じようにグループごと止める

use std::sync::{Mutex, PoisonError};

use tokio::process::Child;
use tracing::{debug, warn};

use crate::domain::{JobId, JobStatus};
use crate::ports::JobHandle;

#[derive(Debug)]
struct ProcessState {
    child: Child,
    /// Read at wrap time, while the child cannot have been reaped yet.
    #[cfg_attr(not(unix), allow(dead_code))]
    group: Option<u32>,
    status: JobStatus,
    reason: Option<String>,
    kill_sent: bool,
}

#[derive(Debug)]
pub struct ProcessJob {
    id: JobId,
    program: String,
    state: Mutex<ProcessState>,
}

impl ProcessJob {
    /// Wrap an already spawned child.
    ///
    /// Spawn it with `process_group(0)` so that `terminate()` also reaches
    /// every process the command started.
    pub fn new(id: JobId, program: impl Into<String>, child: Child) -> Self {
        let group = child.id();
        Self {
            id,
            program: program.into(),
            state: Mutex::new(ProcessState {
                child,
                group,
                status: JobStatus::Running,
                reason: None,
                kill_sent: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessState {
    /// Reap the child if it has exited and cache the terminal status.
    fn refresh(&mut self, program: &str) {
        if self.status.is_terminal() {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(exit)) => {
                if exit.success() {
                    self.status = JobStatus::Finished;
                } else {
                    self.status = JobStatus::Failed;
                    self.reason = Some(if self.kill_sent {
                        "terminated".to_string()
                    } else {
                        format!("'{program}' exited with {exit}")
                    });
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.status = JobStatus::Failed;
                self.reason = Some(format!("could not query '{program}': {e}"));
            }
        }
    }

    /// SIGKILL the child's process group, or the child alone if it leads none.
    fn kill(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        if let Some(pgid) = self.group {
            if kill_group(pgid).is_ok() {
                return Ok(());
            }
        }
        self.child.start_kill()
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) -> nix::Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pgid).map_err(|_| nix::errno::Errno::EINVAL)?;
    killpg(Pid::from_raw(pgid), Signal::SIGKILL)
}

impl JobHandle for ProcessJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn status(&self) -> JobStatus {
        let mut state = self.lock();
        state.refresh(&self.program);
        state.status
    }

    fn terminate(&self) {
        let mut state = self.lock();
        state.refresh(&self.program);
        if state.status.is_terminal() || state.kill_sent {
            return;
        }
        match state.kill() {
            Ok(()) => {
                debug!(job_id = %self.id, program = %self.program, "kill signal sent");
            }
            Err(e) => {
                // 直前に終了して reap 済みの場合もここに来る
                warn!(job_id = %self.id, program = %self.program, error = %e, "kill failed");
            }
        }
        state.kill_sent = true;
    }

    fn failure_reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }
}

impl Drop for ProcessJob {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.refresh(&self.program);
        if !state.status.is_terminal() {
            if let Err(e) = state.kill() {
                debug!(job_id = %self.id, error = %e, "kill on drop failed");
            }
        }
    }
}
