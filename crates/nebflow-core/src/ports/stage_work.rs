//! Stage work ports - stage が実際に行う仕事の抽象化
//!
//! # 二種類の stage
//! - **SyncWork**: 呼び出し内で完了する。開始後は中断できない
//! - **PollableWork**: すぐに JobHandle を返し、supervisor がポーリングする
//!
//! クロージャにも blanket impl があるので、テストや小さな計算は
//! `Stage::synchronous("name", role, |inputs| ...)` のように書けます。

use async_trait::async_trait;

use super::job_handle::JobHandle;
use crate::domain::{StageError, StageInputs};

/// Work that runs to completion inside one blocking call.
///
/// The supervisor runs it on the blocking thread pool, so it may block on
/// I/O or computation freely. Cancellation requested meanwhile is honored
/// only after it returns.
pub trait SyncWork: Send + Sync + 'static {
    fn run(&self, inputs: &StageInputs) -> Result<(), StageError>;
}

impl<F> SyncWork for F
where
    F: Fn(&StageInputs) -> Result<(), StageError> + Send + Sync + 'static,
{
    fn run(&self, inputs: &StageInputs) -> Result<(), StageError> {
        self(inputs)
    }
}

/// Work that starts asynchronously and is observed through a `JobHandle`.
///
/// `start` must return promptly: spawn the work and hand back the handle.
#[async_trait]
pub trait PollableWork: Send + Sync + 'static {
    async fn start(&self, inputs: &StageInputs) -> Result<Box<dyn JobHandle>, StageError>;
}

#[async_trait]
impl<F> PollableWork for F
where
    F: Fn(&StageInputs) -> Result<Box<dyn JobHandle>, StageError> + Send + Sync + 'static,
{
    async fn start(&self, inputs: &StageInputs) -> Result<Box<dyn JobHandle>, StageError> {
        self(inputs)
    }
}
